use anyhow::Result;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use medbook_marketplace::{
    consumers, events,
    infra::{
        bootstrap::{self, bootstrap},
        config, db,
    },
    routes,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let app = routes::router();

    tracing::info!("Running migrations...");
    let config = config::load()?;
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    tracing::info!("Bootstrapping...");
    bootstrap(
        "MedBook",
        app,
        vec![
            (
                events::DELIVERY_REQUESTED,
                consumers::deliveries::delivery_requested,
            ),
            (
                events::DELIVERY_ASSIGNED,
                consumers::deliveries::delivery_assigned,
            ),
        ],
    )
    .await?;
    Ok(())
}

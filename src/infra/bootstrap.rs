use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper, dsl::exists, select};
use diesel_async::{AsyncConnection, RunQueryDsl};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use crate::{
    domain::Role,
    infra::{
        app_state::AppState,
        auth, config,
        middleware,
        outbox::{self, RelayTarget},
        rmq::{self, ConsumerHandler},
    },
    models::{CreateAdminEntity, CreateUserEntity, UserEntity},
    schema::{admins, users},
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

pub fn init_env() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
        Err(_) => tracing::debug!("No .env file found, using process environment"),
    }
}

/// Builds the shared state, starts background workers and serves `app`
/// until Ctrl-C or SIGTERM.
pub async fn bootstrap(
    name: &str,
    app: Router<AppState>,
    consumers: Vec<(&'static str, ConsumerHandler)>,
) -> Result<()> {
    let config = config::load()?;
    let state = AppState::init(config).await?;
    seed_admin(&state).await?;

    let shared = Arc::new(state.clone());
    let relay_target = match &state.config.amqp {
        Some(amqp) => {
            let channel = rmq::connect(amqp).await?;
            tokio::spawn({
                let channel = channel.clone();
                let exchange = amqp.exchange.clone();
                let consumer_name = format!("{}-{}", name, std::process::id());
                let state = shared.clone();
                async move {
                    if let Err(err) =
                        rmq::consume(channel, exchange, &consumer_name, consumers, state).await
                    {
                        tracing::error!("Consumer stopped: {:?}", err);
                    }
                }
            });
            tracing::info!("Relaying events through exchange {}", amqp.exchange);
            RelayTarget::Broker {
                channel,
                exchange: amqp.exchange.clone(),
            }
        }
        None => {
            tracing::info!("AMQP_URL not set, relaying events in-process");
            RelayTarget::Local
        }
    };
    tokio::spawn(outbox::run_relay(shared, relay_target));

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = with_middleware(app, state)?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("{} listening on {}", name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("{} stopped", name);
    Ok(())
}

/// Applies authentication, request tracing and CORS, then binds the state.
pub fn with_middleware(app: Router<AppState>, state: AppState) -> Result<Router> {
    let cors = match &state.config.cors_allow_origin {
        Some(origin) => CorsLayer::new().allow_origin(
            origin
                .parse::<HeaderValue>()
                .context("CORS_ALLOW_ORIGIN is not a valid header value")?,
        ),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Ok(app
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authentication,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Creates the configured administrator account once.
async fn seed_admin(state: &AppState) -> Result<()> {
    let Some(seed) = state.config.admin_seed.clone() else {
        return Ok(());
    };
    let email = seed.email.trim().to_lowercase();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let already_seeded: bool = select(exists(users::table.filter(users::email.eq(&email))))
        .get_result(conn)
        .await
        .context("Failed to look up admin account")?;
    if already_seeded {
        return Ok(());
    }

    let password_hash = auth::hash_password(seed.password).await?;
    conn.transaction(move |conn| {
        Box::pin(async move {
            let user = diesel::insert_into(users::table)
                .values(CreateUserEntity {
                    email,
                    password_hash,
                    role: Role::Admin,
                    is_approved: true,
                })
                .returning(UserEntity::as_returning())
                .get_result(conn)
                .await?;

            diesel::insert_into(admins::table)
                .values(CreateAdminEntity {
                    user_id: user.id,
                    full_name: "Administrator".into(),
                })
                .execute(conn)
                .await?;

            tracing::info!("Seeded admin account {}", user.email);
            Ok::<(), diesel::result::Error>(())
        })
    })
    .await
    .context("Failed to seed admin account")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {:?}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

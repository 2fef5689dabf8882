use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;

use crate::{
    dispatch::DispatchHub,
    infra::{
        config::AppConfig,
        db::{self, DbPool},
    },
    storage::PrescriptionStore,
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub http_client: Client,
    pub config: Arc<AppConfig>,
    pub dispatch: DispatchHub,
    pub prescriptions: PrescriptionStore,
}

impl AppState {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let db_pool = db::create_pool(&config.database).await?;
        Self::with_pool(config, db_pool)
    }

    pub fn with_pool(config: AppConfig, db_pool: DbPool) -> Result<Self> {
        let prescriptions = PrescriptionStore::open(&config.uploads)?;
        Ok(Self {
            db_pool,
            http_client: Client::new(),
            config: Arc::new(config),
            dispatch: DispatchHub::new(),
            prescriptions,
        })
    }
}

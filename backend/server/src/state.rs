use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use super::{
    config::Config, database::init_pool, merge::MigrationMerger, query::QueryService,
    toggle::ToggleCoordinator,
};

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub toggle: ToggleCoordinator,
    pub merger: MigrationMerger,
    pub query: QueryService,
}

impl AppState {
    pub async fn new() -> Result<Arc<Self>> {
        let config = Config::load()?;

        let pool = init_pool(&config.database_url, config.max_connections).await?;

        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            toggle: ToggleCoordinator::new(pool.clone()),
            merger: MigrationMerger::new(pool.clone()),
            query: QueryService::new(pool.clone()),
            config,
            pool,
        })
    }
}

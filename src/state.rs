use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::{self, PgPool},
    error::{AppError, AppResult},
    storage::{ObjectStorage, S3Storage},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
        }
    }

    /// Build the full production stack (pool, S3 storage, JWT service) from
    /// configuration. `pool_size` differs per binary: the API serves many
    /// concurrent requests, the worker needs one connection per loop.
    pub async fn init(config: AppConfig, pool_size: u32) -> anyhow::Result<Self> {
        let pool = db::init_pool_with_size(&config.database_url, pool_size)?;
        let storage = Arc::new(S3Storage::from_config(&config).await?);
        let jwt = JwtService::from_config(&config)?;
        Ok(Self::new(pool, config, storage, jwt))
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}

//! Connection pool wrapper around `deadpool-postgres`.
//!
//! Mirrors the shape of a hand-rolled `deadpool::managed` pool (stats,
//! `get()`, a single owned config) but delegates connection management to
//! `deadpool-postgres`'s own manager rather than reimplementing one.

use deadpool_postgres::{Config as PgPoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::config::RagConfig;
use crate::error::{RagError, Result};

#[derive(Clone)]
pub struct RagPool {
    inner: Pool,
}

impl RagPool {
    pub fn build(config: &RagConfig) -> Result<Self> {
        let mut pg_cfg = config
            .connection_string
            .parse::<tokio_postgres::Config>()
            .map_err(|e| RagError::Config(format!("invalid connection string: {e}")))?;
        pg_cfg.connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs));

        let mut pool_cfg = PgPoolConfig::new();
        pool_cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        let mut pool_cfg = pool_cfg;
        pool_cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_max_size));

        let manager = deadpool_postgres::Manager::from_config(pg_cfg, NoTls, pool_cfg.manager.clone().unwrap());
        let pool = Pool::builder(manager)
            .max_size(config.pool_max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RagError::Config(format!("failed to build pool: {e}")))?;

        Ok(Self { inner: pool })
    }

    pub async fn get(&self) -> Result<deadpool_postgres::Object> {
        Ok(self.inner.get().await?)
    }

    pub fn status(&self) -> deadpool_postgres::Status {
        self.inner.status()
    }

    /// Marks the pool closed: outstanding connections finish their current
    /// checkout and are then dropped rather than recycled.
    pub fn close(&self) {
        self.inner.close();
    }
}

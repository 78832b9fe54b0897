//! Typed error surface for the retrieval data plane.

use thiserror::Error;

/// Unified error type returned from public entry points.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::CreatePoolError),

    #[error("embedding error: {0}")]
    Embed(String),

    #[error("rerank error: {0}")]
    Rerank(String),

    #[error("invalid backup: {0}")]
    InvalidBackup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

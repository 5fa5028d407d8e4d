//! Error types shared across the crate.

use thiserror::Error;

/// Persistence-layer failures, independent of backend.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "libsql")]
    #[error("libsql error: {0}")]
    LibSql(#[from] libsql::Error),
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Configuration resolution failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to read settings file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse settings file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Failures surfaced by the lead query service and lead actions.
#[derive(Debug, Error)]
pub enum LeadError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("record store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),
}

/// Gateway startup failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway failed to start: {reason}")]
    StartupFailed { reason: String },
}

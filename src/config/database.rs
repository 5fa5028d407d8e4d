use std::path::PathBuf;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    LibSql,
}

impl DatabaseBackend {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "libsql" | "sqlite" | "turso" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_BACKEND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::LibSql => "libsql",
        }
    }
}

/// Record store connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: Option<SecretString>,
    pub pool_size: usize,
    pub libsql_path: Option<PathBuf>,
    pub libsql_url: Option<String>,
    pub libsql_auth_token: Option<SecretString>,
}

/// Default on-disk location for the embedded database.
pub fn default_libsql_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dealflow")
        .join("dealflow.db")
}

impl DatabaseConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = DatabaseBackend::from_str(&parse_string_env(
            "DATABASE_BACKEND",
            settings.database.backend.clone(),
        )?)?;

        let url = optional_env("DATABASE_URL")?.map(SecretString::from);
        if backend == DatabaseBackend::Postgres && url.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DATABASE_URL".to_string(),
                hint: "set DATABASE_URL or use DATABASE_BACKEND=libsql".to_string(),
            });
        }

        let pool_size = parse_env("DATABASE_POOL_SIZE", settings.database.pool_size)?;
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: "pool size must be at least 1".to_string(),
            });
        }

        let libsql_path = optional_env("LIBSQL_PATH")?
            .or_else(|| settings.database.libsql_path.clone())
            .map(PathBuf::from);

        Ok(Self {
            backend,
            url,
            pool_size,
            libsql_path,
            libsql_url: optional_env("LIBSQL_URL")?,
            libsql_auth_token: optional_env("LIBSQL_AUTH_TOKEN")?.map(SecretString::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DatabaseBackend;
    use crate::error::ConfigError;

    #[test]
    fn backend_aliases_parse() {
        assert_eq!(
            DatabaseBackend::from_str("PostgreSQL").expect("pg"),
            DatabaseBackend::Postgres
        );
        assert_eq!(
            DatabaseBackend::from_str(" sqlite ").expect("libsql"),
            DatabaseBackend::LibSql
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = DatabaseBackend::from_str("mongo").expect_err("must reject");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "DATABASE_BACKEND");
    }
}

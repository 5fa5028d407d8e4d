//! Runtime configuration.
//!
//! Resolution order, highest priority first: environment variables (a `.env`
//! file is loaded by the binary before resolving), the TOML settings file,
//! compiled defaults.

mod audit;
mod database;
mod gateway;
pub(crate) mod helpers;

pub use audit::AuditConfig;
pub use database::{DatabaseBackend, DatabaseConfig, default_libsql_path};
pub use gateway::{ApiToken, GatewayConfig};

use crate::error::ConfigError;
use crate::settings::Settings;

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub audit: AuditConfig,
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve(settings)?,
            gateway: GatewayConfig::resolve(settings)?,
            audit: AuditConfig::resolve(settings)?,
        })
    }
}

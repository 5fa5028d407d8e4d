//! File-backed settings.
//!
//! Settings are the lowest-priority configuration layer: compiled defaults,
//! optionally overridden by a TOML file. Environment variables are applied on
//! top of these by `config::Config::resolve`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub gateway: GatewaySettings,
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `postgres` or `libsql`.
    pub backend: String,
    pub pool_size: usize,
    pub libsql_path: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            pool_size: 10,
            libsql_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "logs/crm_audit.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&raw).map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })
    }

    fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let settings = Settings::from_toml(
            r#"
            [gateway]
            port = 8080
            "#,
        )
        .expect("parse");

        assert_eq!(settings.gateway.port, 8080);
        assert_eq!(settings.gateway.host, "127.0.0.1");
        assert_eq!(settings.database.backend, "postgres");
        assert!(settings.audit.hash_chain);
    }

    #[test]
    fn load_reports_missing_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.toml");
        let err = Settings::load(Some(&path)).expect_err("missing file must fail");
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(Settings::from_toml("[gateway\nport = ").is_err());
    }
}

use std::path::{Component, Path, PathBuf};

use crate::config::helpers::{parse_bool_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// CRM audit log controls.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

const AUDIT_PATH_KEY: &str = "CRM_AUDIT_PATH";

/// Audit files live in `logs/` under the working directory and are JSONL.
fn audit_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: AUDIT_PATH_KEY.to_string(),
        message: message.to_string(),
    };

    let mut path = PathBuf::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(invalid("must be a relative path without '..'")),
        }
    }

    match path.strip_prefix("logs") {
        Ok(file) if file.extension().is_some_and(|ext| ext == "jsonl") => Ok(path),
        _ => Err(invalid("must name a .jsonl file under logs/")),
    }
}

impl AuditConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: parse_bool_env("CRM_AUDIT_ENABLED", settings.audit.enabled)?,
            path: {
                let raw = parse_string_env(AUDIT_PATH_KEY, settings.audit.path.clone())?;
                audit_path(&raw)?
            },
            hash_chain: parse_bool_env("CRM_AUDIT_HASH_CHAIN", settings.audit.hash_chain)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::error::ConfigError;
    use crate::settings::Settings;

    #[test]
    fn audit_resolve_uses_defaults() {
        let config = super::AuditConfig::resolve(&Settings::default()).expect("audit config");
        assert!(config.enabled);
        assert!(config.hash_chain);
        assert_eq!(config.path, PathBuf::from("logs/crm_audit.jsonl"));
    }

    fn rejection(raw: &str) -> String {
        match super::audit_path(raw) {
            Err(ConfigError::InvalidValue { key, message }) => {
                assert_eq!(key, "CRM_AUDIT_PATH");
                message
            }
            other => panic!("expected InvalidValue for {raw:?}, got {other:?}"),
        }
    }

    #[test]
    fn audit_path_drops_cur_dir_segments() {
        let path = super::audit_path(" ./logs//crm/./audit.jsonl/ ").expect("accepted");
        assert_eq!(path, PathBuf::from("logs/crm/audit.jsonl"));
    }

    #[test]
    fn audit_path_must_stay_relative() {
        let absolute = if cfg!(windows) {
            r"C:\logs\audit.jsonl"
        } else {
            "/logs/audit.jsonl"
        };
        for raw in ["logs/../audit.jsonl", "logs/../../etc/audit.jsonl", absolute] {
            assert!(rejection(raw).contains("relative"), "{raw}");
        }
    }

    #[test]
    fn audit_path_must_be_jsonl_under_logs() {
        for raw in ["", "logs", "logs/", "tmp/audit.jsonl", "logs/audit.txt"] {
            assert!(rejection(raw).contains("under logs/"), "{raw:?}");
        }
    }
}

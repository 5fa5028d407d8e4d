use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use uuid::Uuid;

use crate::config::helpers::{optional_env, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// An API token and the team member it authenticates as.
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub token: SecretString,
    pub user_id: Uuid,
}

/// HTTP gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub api_tokens: Vec<ApiToken>,
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let host_raw = parse_string_env("GATEWAY_HOST", settings.gateway.host.clone())?;
        let host = host_raw
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "GATEWAY_HOST".to_string(),
                message: e.to_string(),
            })?;

        let api_tokens = match optional_env("CRM_API_TOKENS")? {
            Some(raw) => parse_api_tokens(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            host,
            port: parse_env("GATEWAY_PORT", settings.gateway.port)?,
            api_tokens,
        })
    }
}

/// Parse `token:user-uuid` pairs separated by commas.
fn parse_api_tokens(raw: &str) -> Result<Vec<ApiToken>, ConfigError> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((token, user_id)) = entry.split_once(':') else {
            return Err(ConfigError::InvalidValue {
                key: "CRM_API_TOKENS".to_string(),
                message: "entries must look like 'token:user-uuid'".to_string(),
            });
        };
        let token = token.trim();
        if token.len() < 16 {
            return Err(ConfigError::InvalidValue {
                key: "CRM_API_TOKENS".to_string(),
                message: "tokens must be at least 16 characters".to_string(),
            });
        }
        let user_id =
            Uuid::parse_str(user_id.trim()).map_err(|e| ConfigError::InvalidValue {
                key: "CRM_API_TOKENS".to_string(),
                message: format!("invalid user id: {e}"),
            })?;
        out.push(ApiToken {
            token: SecretString::from(token.to_string()),
            user_id,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use uuid::Uuid;

    use super::parse_api_tokens;
    use crate::error::ConfigError;

    #[test]
    fn parses_token_user_pairs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tokens =
            parse_api_tokens(&format!("aaaaaaaaaaaaaaaa:{a}, bbbbbbbbbbbbbbbbbbbb:{b},")).expect("ok");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token.expose_secret(), "aaaaaaaaaaaaaaaa");
        assert_eq!(tokens[0].user_id, a);
        assert_eq!(tokens[1].user_id, b);
    }

    #[test]
    fn rejects_short_tokens() {
        let err = parse_api_tokens(&format!("short:{}", Uuid::new_v4())).expect_err("too short");
        let ConfigError::InvalidValue { message, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert!(message.contains("16"), "unexpected message: {message}");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(parse_api_tokens("aaaaaaaaaaaaaaaaaaaa").is_err());
    }
}

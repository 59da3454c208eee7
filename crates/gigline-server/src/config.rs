use std::net::SocketAddr;
use std::path::PathBuf;

/// Secrets that ship in examples and must never reach a running server.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GIGLINE_JWT_SECRET is not set")]
    MissingSecret,

    #[error("GIGLINE_JWT_SECRET is a placeholder; set a real secret")]
    PlaceholderSecret,

    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Server settings from `GIGLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub token_ttl_days: i64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("GIGLINE_JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            return Err(ConfigError::PlaceholderSecret);
        }

        let port = match lookup("GIGLINE_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "GIGLINE_PORT",
                value,
            })?,
            None => 3000,
        };

        let token_ttl_days = match lookup("GIGLINE_TOKEN_TTL_DAYS") {
            Some(value) => match value.parse::<i64>() {
                Ok(days) if days > 0 => days,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "GIGLINE_TOKEN_TTL_DAYS",
                        value,
                    });
                }
            },
            None => 30,
        };

        Ok(Self {
            host: lookup("GIGLINE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: lookup("GIGLINE_DB_PATH").unwrap_or_else(|| "gigline.db".into()).into(),
            jwt_secret,
            media_dir: lookup("GIGLINE_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            token_ttl_days,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Invalid {
            name: "GIGLINE_HOST",
            value: self.host.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[("GIGLINE_JWT_SECRET", "s3cr3t-for-tests")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("gigline.db"));
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingSecret)
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("GIGLINE_JWT_SECRET", "dev-secret-change-me")])),
            Err(ConfigError::PlaceholderSecret)
        ));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let bad_port = ServerConfig::from_lookup(lookup(&[
            ("GIGLINE_JWT_SECRET", "s3cr3t-for-tests"),
            ("GIGLINE_PORT", "http"),
        ]));
        assert!(matches!(bad_port, Err(ConfigError::Invalid { name: "GIGLINE_PORT", .. })));

        let bad_ttl = ServerConfig::from_lookup(lookup(&[
            ("GIGLINE_JWT_SECRET", "s3cr3t-for-tests"),
            ("GIGLINE_TOKEN_TTL_DAYS", "0"),
        ]));
        assert!(bad_ttl.is_err());
    }
}

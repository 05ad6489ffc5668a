//! Backend configuration, read from the environment.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `ROSTER_DATABASE_URL` | Postgres connection string; selects the Postgres backend | unset: in-memory backend |
//! | `ROSTER_MAX_CONNECTIONS` | pool size for Postgres | `5` |

use thiserror::Error;

pub const DATABASE_URL_VAR: &str = "ROSTER_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "ROSTER_MAX_CONNECTIONS";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Which backend to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    InMemory,
    Postgres { url: String, max_connections: u32 },
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map instead of the
    /// process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let Some(url) = lookup(DATABASE_URL_VAR).filter(|u| !u.trim().is_empty()) else {
            return Ok(Self::InMemory);
        };

        let max_connections = match lookup(MAX_CONNECTIONS_VAR) {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: MAX_CONNECTIONS_VAR,
                        value: raw,
                    });
                }
            },
        };

        Ok(Self::Postgres {
            url,
            max_connections,
        })
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::InMemory => "in-memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        assert_eq!(BackendConfig::from_lookup(lookup(&[])), Ok(BackendConfig::InMemory));
        assert_eq!(
            BackendConfig::from_lookup(lookup(&[(DATABASE_URL_VAR, "  ")])),
            Ok(BackendConfig::InMemory)
        );
    }

    #[test]
    fn database_url_selects_postgres() {
        let cfg = BackendConfig::from_lookup(lookup(&[(DATABASE_URL_VAR, "postgres://localhost/core")]))
            .unwrap();
        assert_eq!(
            cfg,
            BackendConfig::Postgres {
                url: "postgres://localhost/core".to_string(),
                max_connections: 5,
            }
        );
        assert_eq!(cfg.describe(), "postgres");
    }

    #[test]
    fn rejects_bad_pool_size() {
        let err = BackendConfig::from_lookup(lookup(&[
            (DATABASE_URL_VAR, "postgres://localhost/core"),
            (MAX_CONNECTIONS_VAR, "0"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: MAX_CONNECTIONS_VAR,
                value: "0".to_string(),
            }
        );
    }
}

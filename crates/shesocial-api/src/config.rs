use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// libSQL file holding server documents, or `:memory:`
    pub db_path: String,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub auth_clock_skew: Duration,
    /// Stale writes closer than this to the stored copy are reported as `merge_required`
    pub conflict_window: Duration,
    pub rate_limit_window: Duration,
    pub write_rate_limit_per_window: u32,
    /// Admin account seeded with the owner level on startup
    pub owner_id: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("conflict_window", &self.conflict_window)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "write_rate_limit_per_window",
                &self.write_rate_limit_per_window,
            )
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SHESOCIAL_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "SHESOCIAL_API_DB_PATH", "shesocial-api.db");

        let jwt_secret = required_trimmed(&lookup, "SHESOCIAL_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "SHESOCIAL_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        let access_ttl_secs =
            bounded_secs(&lookup, "SHESOCIAL_ACCESS_TOKEN_TTL_SECS", 900, 60..=86_400)?;
        let refresh_ttl_secs = bounded_secs(
            &lookup,
            "SHESOCIAL_REFRESH_TOKEN_TTL_SECS",
            2_592_000,
            3_600..=7_776_000,
        )?;
        if refresh_ttl_secs <= access_ttl_secs {
            return Err(ConfigError::Invalid(
                "SHESOCIAL_REFRESH_TOKEN_TTL_SECS must exceed SHESOCIAL_ACCESS_TOKEN_TTL_SECS"
                    .to_string(),
            ));
        }
        let auth_clock_skew_secs =
            bounded_secs(&lookup, "SHESOCIAL_AUTH_CLOCK_SKEW_SECS", 60, 0..=300)?;
        let conflict_window_secs =
            bounded_secs(&lookup, "SHESOCIAL_CONFLICT_WINDOW_SECS", 60, 1..=3_600)?;
        let rate_limit_window_secs =
            bounded_secs(&lookup, "SHESOCIAL_RATE_LIMIT_WINDOW_SECS", 60, 10..=3_600)?;

        let write_rate_limit_per_window =
            value_or_default(&lookup, "SHESOCIAL_WRITE_RATE_LIMIT", "600")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SHESOCIAL_WRITE_RATE_LIMIT must be an integer in [1, 100000]".to_string(),
                    )
                })?;
        if !(1..=100_000).contains(&write_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SHESOCIAL_WRITE_RATE_LIMIT must be in [1, 100000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            jwt_secret,
            access_token_ttl: Duration::from_secs(access_ttl_secs),
            refresh_token_ttl: Duration::from_secs(refresh_ttl_secs),
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            conflict_window: Duration::from_secs(conflict_window_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            write_rate_limit_per_window,
            owner_id: optional_trimmed(&lookup, "SHESOCIAL_OWNER_ID"),
        })
    }

    /// Configuration for router tests: in-memory storage and a fixed secret.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: ":memory:".to_string(),
            jwt_secret: "test-secret-test-secret-test-secret".to_string(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(86_400),
            auth_clock_skew: Duration::from_secs(60),
            conflict_window: Duration::from_secs(60),
            rate_limit_window: Duration::from_secs(60),
            write_rate_limit_per_window: 100,
            owner_id: Some("owner-1".to_string()),
        }
    }
}

fn bounded_secs(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let message = || {
        format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        )
    };
    let value = match optional_trimmed(&lookup, name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(message()))?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(message()))
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("SHESOCIAL_JWT_SECRET"));

        let short = HashMap::from([("SHESOCIAL_JWT_SECRET", "short")]);
        assert!(config_from(&short).is_err());
    }

    #[test]
    fn config_defaults() {
        let config = config_from(&HashMap::from([("SHESOCIAL_JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.conflict_window, Duration::from_secs(60));
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.write_rate_limit_per_window, 600);
        assert_eq!(config.owner_id, None);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let map = HashMap::from([
            ("SHESOCIAL_JWT_SECRET", SECRET),
            ("SHESOCIAL_CONFLICT_WINDOW_SECS", "0"),
        ]);
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("SHESOCIAL_CONFLICT_WINDOW_SECS"));

        let map = HashMap::from([
            ("SHESOCIAL_JWT_SECRET", SECRET),
            ("SHESOCIAL_ACCESS_TOKEN_TTL_SECS", "7200"),
            ("SHESOCIAL_REFRESH_TOKEN_TTL_SECS", "3600"),
        ]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_secret() {
        let map = HashMap::from([
            ("SHESOCIAL_JWT_SECRET", SECRET),
            ("SHESOCIAL_OWNER_ID", "founder"),
        ]);
        let config = config_from(&map).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(SECRET));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("founder"));
    }
}

//! Runtime settings for the sync engine.
//!
//! `SyncSettings` is resolved from a lookup closure so the CLI, tests and
//! embedding apps can feed it from the process environment, a profile file or
//! a plain map.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::models::Collection;
use crate::util::{is_http_url, normalize_text_option};

/// Maximum queue items pushed per batch
pub const DEFAULT_BATCH_SIZE: usize = 20;
/// Period of the background sync timer
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Probe latency above which the network is reported as slow
pub const DEFAULT_SLOW_NETWORK_THRESHOLD: Duration = Duration::from_millis(1_500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the remote API, without trailing slash
    pub api_base_url: String,
    pub batch_size: usize,
    pub sync_interval: Duration,
    pub slow_network_threshold: Duration,
    /// Collections the signed-in member may pull
    pub readable_collections: BTreeSet<Collection>,
}

impl SyncSettings {
    /// Settings with defaults for everything except the API URL
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            slow_network_threshold: DEFAULT_SLOW_NETWORK_THRESHOLD,
            readable_collections: Collection::ALL.into_iter().collect(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = normalize_text_option(lookup("SHESOCIAL_API_URL"))
            .ok_or(ConfigError::MissingVar("SHESOCIAL_API_URL"))?;
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(
                "SHESOCIAL_API_URL must start with http:// or https://".to_string(),
            ));
        }
        let mut settings = Self::new(api_base_url);

        if let Some(raw) = normalize_text_option(lookup("SHESOCIAL_SYNC_BATCH_SIZE")) {
            let batch_size = raw.parse::<usize>().map_err(|_| {
                ConfigError::Invalid(
                    "SHESOCIAL_SYNC_BATCH_SIZE must be an integer in [1, 500]".to_string(),
                )
            })?;
            if !(1..=500).contains(&batch_size) {
                return Err(ConfigError::Invalid(
                    "SHESOCIAL_SYNC_BATCH_SIZE must be in [1, 500]".to_string(),
                ));
            }
            settings.batch_size = batch_size;
        }

        if let Some(raw) = normalize_text_option(lookup("SHESOCIAL_SYNC_INTERVAL_SECS")) {
            let secs = raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid(
                    "SHESOCIAL_SYNC_INTERVAL_SECS must be an integer in [5, 3600]".to_string(),
                )
            })?;
            if !(5..=3_600).contains(&secs) {
                return Err(ConfigError::Invalid(
                    "SHESOCIAL_SYNC_INTERVAL_SECS must be in [5, 3600]".to_string(),
                ));
            }
            settings.sync_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = normalize_text_option(lookup("SHESOCIAL_SLOW_NETWORK_MS")) {
            let millis = raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid("SHESOCIAL_SLOW_NETWORK_MS must be an integer".to_string())
            })?;
            if millis == 0 {
                return Err(ConfigError::Invalid(
                    "SHESOCIAL_SLOW_NETWORK_MS must be > 0".to_string(),
                ));
            }
            settings.slow_network_threshold = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("SHESOCIAL_READABLE_COLLECTIONS") {
            settings.readable_collections = parse_collections(&raw)?;
        }

        Ok(settings)
    }
}

/// Parse a comma-separated collection list. An empty list is allowed and
/// disables pulling entirely.
fn parse_collections(raw: &str) -> Result<BTreeSet<Collection>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Collection>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "SHESOCIAL_READABLE_COLLECTIONS contains unknown collection `{name}`"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<SyncSettings, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn settings_require_api_url() {
        let err = settings_from(&[]).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("SHESOCIAL_API_URL"));
    }

    #[test]
    fn settings_defaults() {
        let settings = settings_from(&[("SHESOCIAL_API_URL", "https://api.shesocial.test/")]).unwrap();
        assert_eq!(settings.api_base_url, "https://api.shesocial.test");
        assert_eq!(settings.batch_size, 20);
        assert_eq!(settings.sync_interval, Duration::from_secs(30));
        assert_eq!(settings.slow_network_threshold, Duration::from_millis(1_500));
        assert_eq!(settings.readable_collections.len(), 3);
    }

    #[test]
    fn settings_overrides() {
        let settings = settings_from(&[
            ("SHESOCIAL_API_URL", "http://localhost:8080"),
            ("SHESOCIAL_SYNC_BATCH_SIZE", "5"),
            ("SHESOCIAL_SYNC_INTERVAL_SECS", "60"),
            ("SHESOCIAL_SLOW_NETWORK_MS", "800"),
            ("SHESOCIAL_READABLE_COLLECTIONS", "events, bookings"),
        ])
        .unwrap();
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.sync_interval, Duration::from_secs(60));
        assert_eq!(settings.slow_network_threshold, Duration::from_millis(800));
        assert_eq!(
            settings.readable_collections,
            BTreeSet::from([Collection::Events, Collection::Bookings])
        );
    }

    #[test]
    fn settings_reject_invalid_values() {
        assert!(settings_from(&[("SHESOCIAL_API_URL", "ftp://x")]).is_err());
        assert!(settings_from(&[
            ("SHESOCIAL_API_URL", "http://x"),
            ("SHESOCIAL_SYNC_BATCH_SIZE", "0"),
        ])
        .is_err());
        let err = settings_from(&[
            ("SHESOCIAL_API_URL", "http://x"),
            ("SHESOCIAL_READABLE_COLLECTIONS", "users,payments"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("payments"));
    }
}

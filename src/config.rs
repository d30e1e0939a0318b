use crate::error::{TrackerError, TrackerResult};
use std::time::Duration;

pub const ENV_BASE_URL: &str = "OPTRACK_BASE_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "OPTRACK_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "OPTRACK_REQUEST_TIMEOUT_MS";
pub const ENV_AUTH_TOKEN: &str = "OPTRACK_AUTH_TOKEN";

/// Configuration for the operation tracker
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub base_url: String,
    pub poll_interval: Duration,
    /// Per-request deadline. Expiry is treated as a transient failure.
    pub request_timeout: Option<Duration>,
    pub auth_token: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: crate::DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS),
            request_timeout: None,
            auth_token: None,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `OPTRACK_*` environment variables
    pub fn from_env() -> TrackerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> TrackerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_BASE_URL) {
            config.base_url = url;
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(parse_millis(ENV_POLL_INTERVAL_MS, &ms)?);
        }
        if let Some(ms) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = Some(Duration::from_millis(parse_millis(ENV_REQUEST_TIMEOUT_MS, &ms)?));
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            config.auth_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(TrackerError::InvalidConfig(format!("base URL must be http(s): {}", self.base_url)));
        }
        if self.poll_interval.is_zero() {
            return Err(TrackerError::InvalidInterval);
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TrackerError::InvalidConfig("request timeout must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn parse_millis(key: &str, value: &str) -> TrackerResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| TrackerError::InvalidConfig(format!("{} is not a number of milliseconds: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_tracker_config_default() {
        let config = TrackerConfig::default();
        assert_eq!(config.base_url, "http://localhost:8800");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.request_timeout.is_none());
        assert!(config.auth_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tracker_config_env_overrides() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            (ENV_BASE_URL, "https://console.example.com/"),
            (ENV_POLL_INTERVAL_MS, "500"),
            (ENV_REQUEST_TIMEOUT_MS, "10000"),
            (ENV_AUTH_TOKEN, "Kots abc"),
        ]))
        .unwrap();

        assert_eq!(config.api_root(), "https://console.example.com");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.auth_token.as_deref(), Some("Kots abc"));
    }

    #[test]
    fn test_tracker_config_rejects_zero_interval() {
        let result = TrackerConfig::from_lookup(lookup_from(&[(ENV_POLL_INTERVAL_MS, "0")]));
        assert!(matches!(result, Err(TrackerError::InvalidInterval)));
    }

    #[test]
    fn test_tracker_config_rejects_garbage() {
        let result = TrackerConfig::from_lookup(lookup_from(&[(ENV_POLL_INTERVAL_MS, "soon")]));
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));

        let result = TrackerConfig::from_lookup(lookup_from(&[(ENV_BASE_URL, "localhost:8800")]));
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
    }
}

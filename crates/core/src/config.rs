// crates/core/src/config.rs
//! Tracker and client configuration.

use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Polling behaviour of a `JobTracker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delay between status fetches for one job.
    pub poll_interval: Duration,
    /// Give up on a poll (without failing the job) after this long.
    pub poll_timeout: Duration,
    /// Buffer size of the tracker's event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `ARTICLE_AUDIO_POLL_INTERVAL_MS` and
    /// `ARTICLE_AUDIO_POLL_TIMEOUT_SECS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("ARTICLE_AUDIO_POLL_INTERVAL_MS").filter(|ms| *ms > 0) {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("ARTICLE_AUDIO_POLL_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.poll_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Connection settings for the REST adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.into(),
            api_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `ARTICLE_AUDIO_API_URL`,
    /// `ARTICLE_AUDIO_API_TOKEN` and `ARTICLE_AUDIO_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env_non_empty("ARTICLE_AUDIO_API_URL") {
            config.base_url = url;
        }
        config.api_token = env_non_empty("ARTICLE_AUDIO_API_TOKEN");
        if let Some(secs) = env_u64("ARTICLE_AUDIO_REQUEST_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env_non_empty(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "ARTICLE_AUDIO_POLL_INTERVAL_MS",
            "ARTICLE_AUDIO_POLL_TIMEOUT_SECS",
            "ARTICLE_AUDIO_API_URL",
            "ARTICLE_AUDIO_API_TOKEN",
            "ARTICLE_AUDIO_REQUEST_TIMEOUT_SECS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_tracker_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.poll_timeout, Duration::from_secs(300));
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_tracker_from_env_overrides() {
        clear_env();
        std::env::set_var("ARTICLE_AUDIO_POLL_INTERVAL_MS", "500");
        std::env::set_var("ARTICLE_AUDIO_POLL_TIMEOUT_SECS", "not-a-number");
        let config = TrackerConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_client_from_env() {
        clear_env();
        std::env::set_var("ARTICLE_AUDIO_API_URL", "https://cms.example.com ");
        std::env::set_var("ARTICLE_AUDIO_API_TOKEN", "  ");
        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "https://cms.example.com");
        assert_eq!(config.api_token, None);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        clear_env();
    }
}

//! Watcher configuration.
//!
//! Loaded from environment variables with `envy`:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DATABASE_CONNECT_TIMEOUT_SECS`: give up connecting after this long (default: 10)
//! - `NOTIFY_CHANNEL`: channel to LISTEN on (default: "image_notify_channel")
//! - `PULL_IF_MISSING`: pull images absent from the local cache (default: true)
//! - `CLEANUP_ON_START_FAILURE`: remove containers that fail to start (default: true)
//! - `LISTEN_RETRY_INITIAL_MS`: first backoff delay after a wait error (default: 250)
//! - `LISTEN_RETRY_MAX_MS`: backoff ceiling (default: 30000)
//! - `LISTEN_MAX_CONSECUTIVE_FAILURES`: wait errors before giving up (default: 10)
//!
//! Docker connection settings are read by the engine client itself
//! (`DOCKER_HOST`, ...).

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::docker::LaunchOptions;
use crate::retry::RetryPolicy;

/// Default notification channel.
pub const DEFAULT_CHANNEL: &str = "image_notify_channel";

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// PostgreSQL connection string.
    pub database_url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub database_connect_timeout_secs: u64,

    /// Channel to subscribe to.
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,

    /// Pull images absent from the local cache before creating.
    #[serde(default = "default_true")]
    pub pull_if_missing: bool,

    /// Remove containers that were created but failed to start.
    #[serde(default = "default_true")]
    pub cleanup_on_start_failure: bool,

    #[serde(default = "default_retry_initial_ms")]
    pub listen_retry_initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub listen_retry_max_ms: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub listen_max_consecutive_failures: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_notify_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_initial_ms() -> u64 {
    250
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_max_consecutive_failures() -> u32 {
    10
}

impl WatcherConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: WatcherConfig = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if self.database_connect_timeout_secs == 0 {
            bail!("DATABASE_CONNECT_TIMEOUT_SECS must be at least 1");
        }
        if self.notify_channel.trim().is_empty() {
            bail!("NOTIFY_CHANNEL must not be empty");
        }
        if self.listen_max_consecutive_failures == 0 {
            bail!("LISTEN_MAX_CONSECUTIVE_FAILURES must be at least 1");
        }
        if self.listen_retry_initial_ms > self.listen_retry_max_ms {
            bail!("LISTEN_RETRY_INITIAL_MS must not exceed LISTEN_RETRY_MAX_MS");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database_connect_timeout_secs)
    }

    /// Backoff policy for the notification wait loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.listen_retry_initial_ms),
            Duration::from_millis(self.listen_retry_max_ms),
            self.listen_max_consecutive_failures,
        )
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            pull_if_missing: self.pull_if_missing,
            cleanup_on_start_failure: self.cleanup_on_start_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = tokio_test::assert_ok!(WatcherConfig::from_vars(vars(&[(
            "DATABASE_URL",
            "postgres://localhost/app"
        )])));
        assert_eq!(config.notify_channel, "image_notify_channel");
        assert!(config.pull_if_missing);
        assert!(config.cleanup_on_start_failure);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));

        let policy = config.retry_policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_consecutive_failures, 10);
    }

    #[test]
    fn test_config_overrides() {
        let config = WatcherConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("NOTIFY_CHANNEL", "deployments"),
            ("PULL_IF_MISSING", "false"),
            ("CLEANUP_ON_START_FAILURE", "false"),
            ("LISTEN_MAX_CONSECUTIVE_FAILURES", "3"),
            ("DATABASE_CONNECT_TIMEOUT_SECS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.notify_channel, "deployments");
        assert!(!config.launch_options().pull_if_missing);
        assert!(!config.launch_options().cleanup_on_start_failure);
        assert_eq!(config.retry_policy().max_consecutive_failures, 3);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_requires_database_url() {
        tokio_test::assert_err!(WatcherConfig::from_vars(vars(&[("NOTIFY_CHANNEL", "x")])));
    }

    #[test]
    fn test_config_rejects_empty_channel_and_zero_threshold() {
        assert!(WatcherConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("NOTIFY_CHANNEL", " "),
        ]))
        .is_err());

        assert!(WatcherConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("LISTEN_MAX_CONSECUTIVE_FAILURES", "0"),
        ]))
        .is_err());
    }
}

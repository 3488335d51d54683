//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/action_processor";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Processor Configuration Constants
// ============================================================================

/// Default sleep between polling cycles when the queue is empty.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default number of events claimed per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default number of events executed concurrently within a cycle.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default ceiling on event retries requested through the retry command.
pub const DEFAULT_MAX_EVENT_RETRIES: i32 = crate::domain::DEFAULT_MAX_RETRIES;

/// Slack a stale timeout must leave on top of the longest action call.
pub const STALE_TIMEOUT_MARGIN_SECS: u64 = 30;

// ============================================================================
// Action Configuration Constants
// ============================================================================

/// Default per-attempt timeout for external action calls.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts for one external action call.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default exponential backoff base, in seconds.
pub const DEFAULT_RETRY_BACKOFF_BASE: f64 = 2.0;

/// Default action type served by the HTTP handler.
pub const DEFAULT_HTTP_ACTION_TYPE: &str = "HTTP_ACTION";

/// Processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub processor: ProcessorConfig,
    pub action: ActionConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Polling loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_event_retries: i32,
    /// Age after which a Processing event is released back to Pending.
    /// `None` disables reclaiming.
    pub stale_event_timeout_secs: Option<u64>,
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_event_timeout(&self) -> Option<Duration> {
        self.stale_event_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_event_retries: DEFAULT_MAX_EVENT_RETRIES,
            stale_event_timeout_secs: None,
        }
    }
}

/// External action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Endpoint for the HTTP action handler. The handler is not registered
    /// when unset.
    pub endpoint: Option<String>,
    pub http_action_type: String,
    pub timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_base: f64,
}

impl ActionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            backoff_base: self.retry_backoff_base,
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            http_action_type: DEFAULT_HTTP_ACTION_TYPE.to_string(),
            timeout_secs: DEFAULT_ACTION_TIMEOUT_SECS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            processor: ProcessorConfig {
                poll_interval_secs: env_or("AP_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS),
                batch_size: env_or("AP_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                max_concurrency: env_or("AP_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY),
                max_event_retries: env_or("AP_MAX_EVENT_RETRIES", DEFAULT_MAX_EVENT_RETRIES),
                stale_event_timeout_secs: env_opt("AP_STALE_EVENT_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok()),
            },
            action: ActionConfig {
                endpoint: env_opt("AP_ACTION_ENDPOINT"),
                http_action_type: env_opt("AP_HTTP_ACTION_TYPE")
                    .unwrap_or_else(|| DEFAULT_HTTP_ACTION_TYPE.to_string()),
                timeout_secs: env_or("AP_ACTION_TIMEOUT_SECS", DEFAULT_ACTION_TIMEOUT_SECS),
                retry_max_attempts: env_or("AP_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
                retry_backoff_base: env_or("AP_RETRY_BACKOFF_BASE", DEFAULT_RETRY_BACKOFF_BASE),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.processor.batch_size == 0 {
            anyhow::bail!("AP_BATCH_SIZE must be greater than 0");
        }

        if self.processor.max_concurrency == 0 {
            anyhow::bail!("AP_MAX_CONCURRENCY must be greater than 0");
        }

        if self.processor.max_event_retries < 1 {
            anyhow::bail!("AP_MAX_EVENT_RETRIES must be at least 1");
        }

        if self.action.timeout_secs == 0 {
            anyhow::bail!("AP_ACTION_TIMEOUT_SECS must be greater than 0");
        }

        if self.action.retry_max_attempts == 0 {
            anyhow::bail!("AP_RETRY_MAX_ATTEMPTS must be greater than 0");
        }

        if self.action.retry_backoff_base.is_nan() || self.action.retry_backoff_base < 1.0 {
            anyhow::bail!(
                "AP_RETRY_BACKOFF_BASE must be at least 1.0, got {}",
                self.action.retry_backoff_base
            );
        }

        // A live claim must never look stale to another worker
        if let Some(stale) = self.processor.stale_event_timeout() {
            let floor = self
                .action
                .retry_policy()
                .worst_case_duration()
                .saturating_add(Duration::from_secs(STALE_TIMEOUT_MARGIN_SECS));
            if stale <= floor {
                anyhow::bail!(
                    "AP_STALE_EVENT_TIMEOUT_SECS ({}) must exceed the longest action call plus {}s, i.e. more than {}s",
                    stale.as_secs(),
                    STALE_TIMEOUT_MARGIN_SECS,
                    floor.as_secs()
                );
            }
        }

        if let Some(endpoint) = &self.action.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("AP_ACTION_ENDPOINT must be an http(s) URL, got '{}'", endpoint);
            }
        }

        if self.processor.batch_size < self.processor.max_concurrency {
            tracing::debug!(
                batch_size = self.processor.batch_size,
                max_concurrency = self.processor.max_concurrency,
                "Concurrency is capped by batch size"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            processor: ProcessorConfig::default(),
            action: ActionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "AP_POLL_INTERVAL_SECS",
        "AP_BATCH_SIZE",
        "AP_MAX_CONCURRENCY",
        "AP_MAX_EVENT_RETRIES",
        "AP_STALE_EVENT_TIMEOUT_SECS",
        "AP_ACTION_ENDPOINT",
        "AP_HTTP_ACTION_TYPE",
        "AP_ACTION_TIMEOUT_SECS",
        "AP_RETRY_MAX_ATTEMPTS",
        "AP_RETRY_BACKOFF_BASE",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processor.batch_size, 10);
        assert_eq!(config.processor.poll_interval(), Duration::from_secs(5));
        assert!(config.processor.stale_event_timeout().is_none());
        assert!(config.action.endpoint.is_none());
    }

    #[test]
    #[serial]
    fn test_load_reads_processor_settings() {
        clear_env();
        std::env::set_var("AP_BATCH_SIZE", "25");
        std::env::set_var("AP_MAX_CONCURRENCY", "4");
        std::env::set_var("AP_STALE_EVENT_TIMEOUT_SECS", "900");
        std::env::set_var("AP_ACTION_ENDPOINT", "https://actions.internal/execute");
        std::env::set_var("AP_RETRY_BACKOFF_BASE", "1.5");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.processor.batch_size, 25);
        assert_eq!(config.processor.max_concurrency, 4);
        assert_eq!(config.processor.stale_event_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(
            config.action.endpoint.as_deref(),
            Some("https://actions.internal/execute")
        );
        assert_eq!(config.action.http_action_type, DEFAULT_HTTP_ACTION_TYPE);
        assert_eq!(config.action.retry_policy().backoff_base, 1.5);
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("AP_POLL_INTERVAL_SECS", "soon");
        std::env::set_var("AP_ACTION_ENDPOINT", "   ");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.processor.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.action.endpoint.is_none());
    }

    #[test]
    #[serial]
    fn test_zero_batch_size_is_rejected() {
        clear_env();
        std::env::set_var("AP_BATCH_SIZE", "0");

        let err = Config::load().unwrap_err();
        clear_env();

        assert!(err.to_string().contains("AP_BATCH_SIZE"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.action.endpoint = Some("ftp://example.com".into());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.action.retry_backoff_base = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processor.stale_event_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_timeout_must_outlast_the_longest_action_call() {
        // 3 x 30s attempts + 2s + 4s of backoff + margin
        let floor = 96 + STALE_TIMEOUT_MARGIN_SECS;

        let mut config = Config::default();
        config.processor.stale_event_timeout_secs = Some(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("AP_STALE_EVENT_TIMEOUT_SECS"));

        config.processor.stale_event_timeout_secs = Some(floor);
        assert!(config.validate().is_err());

        config.processor.stale_event_timeout_secs = Some(floor + 1);
        assert!(config.validate().is_ok());

        // a slower action pushes the floor up
        config.action.timeout_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_action_config() {
        let policy = ActionConfig::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }
}

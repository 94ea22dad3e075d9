//! Worker configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use dispatch::{ProcessorConfig, RetryPolicy};
use outbox::OutboxConfig;

/// Where domain events are queued for background handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Postgres,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(QueueBackend::Memory),
            "postgres" => Ok(QueueBackend::Postgres),
            other => Err(format!("unknown queue backend: {other}")),
        }
    }
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: health and metrics listener (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; unset selects the in-memory store
/// - `QUEUE_BACKEND`: `memory` or `postgres` (default `memory`)
/// - `WORKER_ID`: outbox claim owner (default `<HOSTNAME>-<uuid>`)
/// - `BACKGROUND_*`, `QUEUE_POLL_TIMEOUT_MS`: background processor tuning
/// - `OUTBOX_*`: outbox processor tuning
/// - `SHUTDOWN_GRACE_SECS`: time allowed for in-flight work on shutdown
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub queue_backend: QueueBackend,
    pub worker_id: String,

    pub background_max_concurrency: usize,
    pub background_max_attempts: u32,
    pub background_retry_base_delay: Duration,
    pub background_retry_exponential: bool,
    pub queue_poll_timeout: Duration,

    pub outbox_batch_size: usize,
    pub outbox_lease_timeout: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_max_attempts: u32,
    pub outbox_retry_base_delay: Duration,

    pub shutdown_grace: Duration,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4().simple())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            queue_backend: env_or("QUEUE_BACKEND", defaults.queue_backend),
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),

            background_max_concurrency: env_or(
                "BACKGROUND_MAX_CONCURRENCY",
                defaults.background_max_concurrency,
            ),
            background_max_attempts: env_or(
                "BACKGROUND_MAX_ATTEMPTS",
                defaults.background_max_attempts,
            ),
            background_retry_base_delay: env_millis(
                "BACKGROUND_RETRY_BASE_DELAY_MS",
                defaults.background_retry_base_delay,
            ),
            background_retry_exponential: env_or(
                "BACKGROUND_RETRY_EXPONENTIAL",
                defaults.background_retry_exponential,
            ),
            queue_poll_timeout: env_millis("QUEUE_POLL_TIMEOUT_MS", defaults.queue_poll_timeout),

            outbox_batch_size: env_or("OUTBOX_BATCH_SIZE", defaults.outbox_batch_size),
            outbox_lease_timeout: env_secs("OUTBOX_LEASE_TIMEOUT_SECS", defaults.outbox_lease_timeout),
            outbox_poll_interval: env_millis("OUTBOX_POLL_INTERVAL_MS", defaults.outbox_poll_interval),
            outbox_max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts),
            outbox_retry_base_delay: env_millis(
                "OUTBOX_RETRY_BASE_DELAY_MS",
                defaults.outbox_retry_base_delay,
            ),

            shutdown_grace: env_secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_concurrency: self.background_max_concurrency,
            retry: RetryPolicy {
                max_attempts: self.background_max_attempts,
                base_delay: self.background_retry_base_delay,
                exponential: self.background_retry_exponential,
                ..RetryPolicy::default()
            },
            shutdown_grace: self.shutdown_grace,
            ..ProcessorConfig::default()
        }
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            worker_id: self.worker_id.clone(),
            batch_size: self.outbox_batch_size,
            lease_timeout: self.outbox_lease_timeout,
            poll_interval: self.outbox_poll_interval,
            max_attempts: self.outbox_max_attempts,
            retry_base_delay: self.outbox_retry_base_delay,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            queue_backend: QueueBackend::Memory,
            worker_id: default_worker_id(),
            background_max_concurrency: 8,
            background_max_attempts: 3,
            background_retry_base_delay: Duration::from_millis(200),
            background_retry_exponential: true,
            queue_poll_timeout: Duration::from_millis(1000),
            outbox_batch_size: 50,
            outbox_lease_timeout: Duration::from_secs(30),
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_max_attempts: 5,
            outbox_retry_base_delay: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.background_max_concurrency, 8);
        assert_eq!(config.outbox_lease_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(Config::default().worker_id, Config::default().worker_id);
    }

    #[test]
    fn test_queue_backend_parsing() {
        assert_eq!("memory".parse::<QueueBackend>(), Ok(QueueBackend::Memory));
        assert_eq!("Postgres".parse::<QueueBackend>(), Ok(QueueBackend::Postgres));
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_component_configs_follow_settings() {
        let config = Config {
            background_max_attempts: 7,
            background_retry_exponential: false,
            outbox_batch_size: 5,
            worker_id: "w-1".to_string(),
            ..Config::default()
        };

        let processor = config.processor_config();
        assert_eq!(processor.retry.max_attempts, 7);
        assert!(!processor.retry.exponential);

        let outbox = config.outbox_config();
        assert_eq!(outbox.batch_size, 5);
        assert_eq!(outbox.worker_id, "w-1");
    }
}

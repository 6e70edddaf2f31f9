//! Configuration management.
//!
//! Values come from an optional file layered under `MONITRA__*` environment
//! variables, e.g. `MONITRA__DATABASE__URL` or `MONITRA__WORKER__CONCURRENCY`.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{MonitraError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration (queue transport)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Endpoint validation and heartbeat window limits
    #[serde(default)]
    pub checks: ChecksConfig,

    /// Probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Check worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Notification dispatcher configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every queue key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How often due timers are fired
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// How often the schedule is rebuilt from the store
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Interval used when a registration leaves it out
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,

    /// Heartbeats returned when the caller gives no limit
    #[serde(default = "default_window")]
    pub default_window: usize,

    #[serde(default = "default_max_window")]
    pub max_window: usize,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            default_interval_secs: default_interval_secs(),
            default_window: default_window(),
            max_window: default_max_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Hard upper bound for a single probe
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent sent by HTTP probes
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent probes
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease length before an unacknowledged task is redelivered
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Delivery attempts per check task before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_concurrency")]
    pub concurrency: usize,

    /// Sender shown on alert mail
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Mail relay accepting JSON messages; alerts are only logged when unset
    pub relay_url: Option<String>,

    /// Bearer token for the relay
    pub relay_token: Option<String>,

    /// Notify when the very first check of an endpoint comes back down
    #[serde(default)]
    pub notify_on_first_check: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_notification_concurrency(),
            from_address: default_from_address(),
            relay_url: None,
            relay_token: None,
            notify_on_first_check: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Prometheus listener, e.g. `0.0.0.0:9090`
    pub metrics_addr: Option<String>,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_addr: None,
            service_name: default_service_name(),
        }
    }
}

// Default value functions
fn default_database_url() -> String { "postgres://localhost:5432/monitra".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "monitra".to_string() }
fn default_tick_millis() -> u64 { 1000 }
fn default_reconcile_interval_secs() -> u64 { 30 }
fn default_min_interval_secs() -> u64 { 30 }
fn default_max_interval_secs() -> u64 { 86_400 }
fn default_interval_secs() -> u64 { 60 }
fn default_window() -> usize { 50 }
fn default_max_window() -> usize { 500 }
fn default_probe_timeout_secs() -> u64 { 10 }
fn default_user_agent() -> String { format!("monitra/{}", env!("CARGO_PKG_VERSION")) }
fn default_worker_concurrency() -> usize { 8 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_visibility_timeout_secs() -> u64 { 60 }
fn default_shutdown_timeout_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_notification_concurrency() -> usize { 2 }
fn default_from_address() -> String { "Monitra Alerter <alerts@monitra.local>".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "monitra".to_string() }

impl Config {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITRA").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MONITRA").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations that would break the worker or scheduler contracts.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(MonitraError::configuration("worker.concurrency must be at least 1"));
        }
        if self.notifications.concurrency == 0 {
            return Err(MonitraError::configuration(
                "notifications.concurrency must be at least 1",
            ));
        }
        if self.probe.timeout_secs == 0 {
            return Err(MonitraError::configuration("probe.timeout_secs must be at least 1"));
        }
        // A lease shorter than a probe would redeliver tasks that are still running.
        if self.worker.visibility_timeout_secs <= self.probe.timeout_secs {
            return Err(MonitraError::configuration(format!(
                "worker.visibility_timeout_secs ({}) must exceed probe.timeout_secs ({})",
                self.worker.visibility_timeout_secs, self.probe.timeout_secs
            )));
        }
        if self.checks.min_interval_secs == 0
            || self.checks.min_interval_secs > self.checks.max_interval_secs
        {
            return Err(MonitraError::configuration(
                "checks.min_interval_secs must be in 1..=checks.max_interval_secs",
            ));
        }
        if !(self.checks.min_interval_secs..=self.checks.max_interval_secs)
            .contains(&self.checks.default_interval_secs)
        {
            return Err(MonitraError::configuration(
                "checks.default_interval_secs must lie within the allowed interval range",
            ));
        }
        if self.checks.default_window == 0 || self.checks.default_window > self.checks.max_window {
            return Err(MonitraError::configuration(
                "checks.default_window must be in 1..=checks.max_window",
            ));
        }
        if self.scheduler.tick_millis == 0 {
            return Err(MonitraError::configuration("scheduler.tick_millis must be at least 1"));
        }
        if self.worker.max_attempts == 0 {
            return Err(MonitraError::configuration("worker.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checks.min_interval_secs, 30);
        assert_eq!(config.checks.default_interval_secs, 60);
        assert_eq!(config.checks.default_window, 50);
        assert_eq!(config.probe.timeout_secs, 10);
    }

    #[test]
    fn test_visibility_must_exceed_probe_timeout() {
        let mut config = Config::default();
        config.worker.visibility_timeout_secs = 10;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[worker]\nconcurrency = 3\n\n[checks]\nmin_interval_secs = 45\n\n[notifications]\nnotify_on_first_check = true"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.worker.concurrency, 3);
        assert_eq!(config.checks.min_interval_secs, 45);
        assert!(config.notifications.notify_on_first_check);
        assert_eq!(config.redis.key_prefix, "monitra");
    }
}

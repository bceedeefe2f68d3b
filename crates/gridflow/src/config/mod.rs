use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// A century of daily metric samples.
const MAX_RETENTION_DAYS: i64 = 36_500;
const MAX_STUCK_JOB_HOURS: i64 = 24 * 365;

/// Top-level configuration for the platform.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub data: DataConfig,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        let snapshot_path = match env::var("APP_DATA_FILE") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(PathBuf::from(value)),
            Err(_) => Some(PathBuf::from("gridflow.json")),
        };

        let worker = WorkerConfig {
            concurrency: parse_range_var("APP_WORKER_CONCURRENCY", 4, 1, 1024)? as usize,
            max_retries: parse_var("APP_WORKER_MAX_RETRIES", 3u32)?,
            retry_base_delay: Duration::from_secs(parse_var("APP_WORKER_RETRY_BASE_SECS", 60u64)?),
            simulate_latency: parse_bool_var("APP_WORKER_SIMULATE_LATENCY", true)?,
        };

        let scheduler = SchedulerConfig {
            enabled: parse_bool_var("APP_SCHEDULER_ENABLED", true)?,
            metric_retention_days: parse_range_var(
                "APP_METRIC_RETENTION_DAYS",
                30,
                0,
                MAX_RETENTION_DAYS,
            )?,
            stuck_job_hours: parse_range_var("APP_STUCK_JOB_HOURS", 2, 0, MAX_STUCK_JOB_HOURS)?,
            ..SchedulerConfig::default()
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            data: DataConfig { snapshot_path },
            worker,
            scheduler,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name }),
        _ => Ok(default),
    }
}

/// Integer variable that must fall within `min..=max`.
fn parse_range_var(name: &'static str, default: i64, min: i64, max: i64) -> Result<i64, ConfigError> {
    let value = parse_var(name, default)?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange { name, min, max })
    }
}

fn parse_bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { name }),
        },
        _ => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Where the in-memory store is snapshotted between runs.
#[derive(Debug, Clone, Default)]
pub struct DataConfig {
    pub snapshot_path: Option<PathBuf>,
}

/// Background task execution settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    /// Retry countdown is `retry_base_delay * 2^retries`.
    pub retry_base_delay: Duration,
    pub simulate_latency: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(60),
            simulate_latency: true,
        }
    }
}

/// Periodic task settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick: Duration,
    pub health_check_interval: Duration,
    pub cleanup_interval: Duration,
    pub sensor_interval: Duration,
    pub metric_retention_days: i64,
    pub stuck_job_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            sensor_interval: Duration::from_secs(30),
            metric_retention_days: 30,
            stuck_job_hours: 2,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str },
    InvalidFlag { name: &'static str },
    OutOfRange {
        name: &'static str,
        min: i64,
        max: i64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name } => {
                write!(f, "{name} must be a valid non-negative number")
            }
            ConfigError::OutOfRange { name, min, max } => {
                write!(f, "{name} must be between {min} and {max}")
            }
            ConfigError::InvalidFlag { name } => write!(f, "{name} must be true or false"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "APP_LOG_FORMAT",
            "APP_DATA_FILE",
            "APP_WORKER_CONCURRENCY",
            "APP_WORKER_MAX_RETRIES",
            "APP_WORKER_RETRY_BASE_SECS",
            "APP_WORKER_SIMULATE_LATENCY",
            "APP_SCHEDULER_ENABLED",
            "APP_METRIC_RETENTION_DAYS",
            "APP_STUCK_JOB_HOURS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();

        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.format, LogFormat::Compact);
        assert_eq!(
            config.data.snapshot_path,
            Some(PathBuf::from("gridflow.json"))
        );
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.worker.retry_base_delay, Duration::from_secs(60));
        assert_eq!(config.scheduler.metric_retention_days, 30);
        assert_eq!(config.scheduler.stuck_job_hours, 2);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");

        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 8000));
        reset_env();
    }

    #[test]
    fn empty_data_file_disables_snapshots() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_DATA_FILE", "");

        let config = AppConfig::load().expect("config loads");
        assert!(config.data.snapshot_path.is_none());
        reset_env();
    }

    #[test]
    fn rejects_zero_concurrency_and_bad_flags() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_WORKER_CONCURRENCY", "0");
        let err = AppConfig::load().expect_err("zero concurrency rejected");
        assert!(err.to_string().contains("APP_WORKER_CONCURRENCY"));

        reset_env();
        env::set_var("APP_SCHEDULER_ENABLED", "maybe");
        let err = AppConfig::load().expect_err("bad flag rejected");
        assert!(err.to_string().contains("APP_SCHEDULER_ENABLED"));
        reset_env();
    }

    #[test]
    fn rejects_negative_and_oversized_windows() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        for (name, value) in [
            ("APP_METRIC_RETENTION_DAYS", "-1"),
            ("APP_METRIC_RETENTION_DAYS", "9223372036854775807"),
            ("APP_STUCK_JOB_HOURS", "-3"),
            ("APP_STUCK_JOB_HOURS", "100000000"),
            ("APP_WORKER_CONCURRENCY", "100000"),
        ] {
            reset_env();
            env::set_var(name, value);
            let err = AppConfig::load().expect_err("out of range value rejected");
            assert!(
                matches!(err, ConfigError::OutOfRange { name: rejected, .. } if rejected == name),
                "{name}={value}: {err}"
            );
        }

        reset_env();
        env::set_var("APP_METRIC_RETENTION_DAYS", "0");
        let config = AppConfig::load().expect("zero retention is allowed");
        assert_eq!(config.scheduler.metric_retention_days, 0);
        reset_env();
    }
}

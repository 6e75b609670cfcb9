//! Runtime configuration, loaded from `BQ_`-prefixed environment variables.

use std::time::Duration;

/// Tunables controlling dispatch batching, polling, and worker liveness.
///
/// Every field can be overridden via the environment; see [`Config::from_env`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Connection string for the backing PostgreSQL database.
    pub database_url: String,

    /// The maximum number of tasks claimed by a single `dispatch` call.
    pub batch_size: u32,

    /// How long a worker waits on a channel notification before re-checking
    /// for eligible tasks on its own.
    ///
    /// This is a safety net against missed notifications, not the primary
    /// wakeup mechanism.
    pub poll_timeout: Duration,

    /// The period with which a worker updates its heartbeat timestamp.
    pub heartbeat_period: Duration,

    /// The duration after which a worker that hasn't heartbeated is
    /// considered dead and has its in-flight tasks rescheduled.
    ///
    /// Should be set well above `heartbeat_period` — operators are expected
    /// to size this relative to the longest handler they expect to run.
    pub heartbeat_timeout: Duration,

    /// Whether to serve the `/healthz` endpoint.
    pub health_server_enabled: bool,

    /// Bind address for the health endpoint.
    pub health_server_interface: String,

    /// Bind port for the health endpoint.
    pub health_server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            batch_size: 1,
            poll_timeout: Duration::from_secs(60),
            heartbeat_period: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(100),
            health_server_enabled: true,
            health_server_interface: "0.0.0.0".to_owned(),
            health_server_port: 8000,
        }
    }
}

/// Error returned by [`Config::from_env`] when a variable is missing or
/// cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required but was not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    /// Load configuration from the environment, falling back to
    /// [`Config::default`] for anything not set.
    ///
    /// `BQ_DATABASE_URL` is the only variable without a default; every other
    /// field has the value documented on [`Config`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            database_url: required_env("BQ_DATABASE_URL")?,
            ..Self::default()
        };

        if let Some(value) = optional_env("BQ_BATCH_SIZE")? {
            config.batch_size = parse_env("BQ_BATCH_SIZE", &value)?;
        }
        if let Some(value) = optional_env("BQ_POLL_TIMEOUT")? {
            config.poll_timeout = parse_duration_env("BQ_POLL_TIMEOUT", &value)?;
        }
        if let Some(value) = optional_env("BQ_WORKER_HEARTBEAT_PERIOD")? {
            config.heartbeat_period = parse_duration_env("BQ_WORKER_HEARTBEAT_PERIOD", &value)?;
        }
        if let Some(value) = optional_env("BQ_WORKER_HEARTBEAT_TIMEOUT")? {
            config.heartbeat_timeout = parse_duration_env("BQ_WORKER_HEARTBEAT_TIMEOUT", &value)?;
        }
        if let Some(value) = optional_env("BQ_METRICS_HTTP_SERVER_ENABLED")? {
            config.health_server_enabled = parse_env("BQ_METRICS_HTTP_SERVER_ENABLED", &value)?;
        }
        if let Some(value) = optional_env("BQ_METRICS_HTTP_SERVER_INTERFACE")? {
            config.health_server_interface = value;
        }
        if let Some(value) = optional_env("BQ_METRICS_HTTP_SERVER_PORT")? {
            config.health_server_port = parse_env("BQ_METRICS_HTTP_SERVER_PORT", &value)?;
        }

        Ok(config)
    }
}

fn optional_env(name: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::Invalid {
            name,
            value: String::from("<non-utf8>"),
            reason: "value was not valid UTF-8".to_owned(),
        }),
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    optional_env(name)?.ok_or(ConfigError::Missing(name))
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err: T::Err| ConfigError::Invalid {
        name,
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

fn parse_duration_env(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value)
        .or_else(|_| value.parse::<u64>().map(Duration::from_secs))
        .map_err(|err| ConfigError::Invalid {
            name,
            value: value.to_owned(),
            reason: err.to_string(),
        })
}

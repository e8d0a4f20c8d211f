//! Environment-backed runtime settings.
//!
//! Everything configurable from the environment lives in this one table;
//! modules take typed settings structs instead of reading variables ad hoc.
//! `.env` files are honored via `dotenvy` when present.

use miette::Diagnostic;
use thiserror::Error;

pub const ENV_BROKER_SUBSCRIPTION_ID: &str = "BROKER_SUBSCRIPTION_ID";
pub const ENV_BROKER_TYPE: &str = "BROKER_TYPE";
pub const ENV_BROKER_TOPIC: &str = "BROKER_TOPIC";
pub const ENV_TOPIC: &str = "TOPIC";
pub const ENV_SUBSCRIBER_PARALLELISM: &str = "SUBSCRIBER_PARALLELISM";
pub const ENV_FLEET_BASE_URL: &str = "HYPERFLEET_API_BASE_URL";
pub const ENV_FLEET_API_VERSION: &str = "HYPERFLEET_API_VERSION";
pub const ENV_FLEET_TOKEN: &str = "HYPERFLEET_API_TOKEN";
pub const ENV_USER_AGENT: &str = "HYPERFLEET_USER_AGENT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_LOG_OUTPUT: &str = "LOG_OUTPUT";

/// Missing or malformed environment configuration; fatal at bootstrap.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum SettingsError {
    #[error("required environment variable {name} is not set")]
    #[diagnostic(code(hyperfleet::settings::missing))]
    Missing { name: &'static str },

    #[error("environment variable {name} has invalid value {value:?}")]
    #[diagnostic(code(hyperfleet::settings::invalid))]
    Invalid { name: &'static str, value: String },
}

/// Broker subscription settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Driver selector (`memory`, or an external driver name).
    pub broker_type: String,
    /// Default subscription id when the caller passes none.
    pub subscription_id: String,
    /// Topic; `BROKER_TOPIC` wins over `TOPIC`.
    pub topic: String,
    /// Worker pool size per subscription.
    pub parallelism: usize,
}

/// Fleet API settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FleetSettings {
    pub base_url: String,
    pub api_version: String,
    pub token: Option<String>,
    pub user_agent: Option<String>,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    /// `trace` | `debug` | `info` | `warn` | `error`, or any env-filter
    /// directive.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    /// `stdout` or `stderr`.
    pub output: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stdout".to_string(),
        }
    }
}

/// All runtime settings, loaded once at bootstrap.
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub broker: BrokerSettings,
    pub fleet: FleetSettings,
    pub log: LogSettings,
}

impl RuntimeSettings {
    /// Loads settings from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, SettingsError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            broker: BrokerSettings::from_env()?,
            fleet: FleetSettings::from_env()?,
            log: LogSettings::from_env(),
        })
    }
}

impl BrokerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let broker_type = require(ENV_BROKER_TYPE)?;
        let subscription_id = require(ENV_BROKER_SUBSCRIPTION_ID)?;
        let topic = optional(ENV_BROKER_TOPIC)
            .or_else(|| optional(ENV_TOPIC))
            .ok_or(SettingsError::Missing {
                name: ENV_BROKER_TOPIC,
            })?;
        let parallelism = match optional(ENV_SUBSCRIBER_PARALLELISM) {
            None => 1,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(SettingsError::Invalid {
                    name: ENV_SUBSCRIBER_PARALLELISM,
                    value: raw,
                })?,
        };
        Ok(Self {
            broker_type,
            subscription_id,
            topic,
            parallelism,
        })
    }
}

impl FleetSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            base_url: require(ENV_FLEET_BASE_URL)?,
            api_version: optional(ENV_FLEET_API_VERSION).unwrap_or_else(|| "v1".to_string()),
            token: optional(ENV_FLEET_TOKEN),
            user_agent: optional(ENV_USER_AGENT),
        })
    }
}

impl LogSettings {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: optional(ENV_LOG_LEVEL).unwrap_or(defaults.level),
            format: optional(ENV_LOG_FORMAT).unwrap_or(defaults.format),
            output: optional(ENV_LOG_OUTPUT).unwrap_or(defaults.output),
        }
    }
}

fn require(name: &'static str) -> Result<String, SettingsError> {
    optional(name).ok_or(SettingsError::Missing { name })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

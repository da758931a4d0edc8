use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};
use crate::topic::{DEFAULT_NAMESPACE, validate_namespace};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Optional username for broker authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password, only used together with `username`.
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier (default: `mqtt-exporter-<pid>`).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Topic namespace to subscribe to (default: "zigbee2mqtt").
    #[serde(default = "default_namespace")]
    pub topic_namespace: String,

    /// Delay before polling again after a connection error (seconds).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    60
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_reconnect_delay() -> u64 {
    1
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive_secs: default_keepalive(),
            username: None,
            password: None,
            client_id: None,
            topic_namespace: default_namespace(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl MqttConfig {
    /// Overlay values from environment-style variables.
    ///
    /// `lookup` returns the value of a variable if it is set, which keeps
    /// this testable without touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_ADDRESS") {
            self.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(keepalive) = lookup("MQTT_KEEPALIVE") {
            self.keepalive_secs = parse_env("MQTT_KEEPALIVE", &keepalive)?;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.client_id = Some(client_id);
        }
        if let Some(namespace) = lookup("MQTT_TOPIC_NAMESPACE") {
            self.topic_namespace = namespace;
        }
        Ok(())
    }

    /// Validate the connection settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("mqtt.host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("mqtt.port must be > 0".to_string()));
        }
        if self.client_id.as_deref() == Some("") {
            return Err(Error::Config(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }
        validate_namespace(&self.topic_namespace)
            .map_err(|e| Error::Config(format!("mqtt.topic_namespace: {}", e)))
    }

    /// The configured client id, or one derived from the process id.
    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-exporter-{}", std::process::id()))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Overlay `LOG_LEVEL` from the environment.
    ///
    /// The value must be a single level name, see [`normalize_level`].
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.level = normalize_level(&level)?;
        }
        Ok(())
    }
}

/// Turn a level name into a filter directive accepted by `EnvFilter`.
///
/// Case is ignored. `warning` is read as `warn`, `critical` and `fatal` as
/// `error`. Anything that is not a level is an error, since `EnvFilter`
/// would otherwise take it as a target name and enable nothing.
pub fn normalize_level(value: &str) -> Result<String> {
    let level = match value.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    };

    LevelFilter::from_str(&level)
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", value, e)))?;

    Ok(level)
}

/// Parse an environment variable value, reporting the variable on failure.
pub fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value '{}' for {}: {}", value, name, e)))
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

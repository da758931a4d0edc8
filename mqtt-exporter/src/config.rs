//! Configuration for the MQTT exporter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use mqtt_exporter_common::config::{
    LoggingConfig, MqttConfig, load_config, parse_config, parse_env,
};

use crate::mapping::{is_valid_label_name, is_valid_metric_prefix};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or parsing the file, or an unparsable environment value.
    #[error(transparent)]
    Load(#[from] mqtt_exporter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Prometheus exposition settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint and metric naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "mqtt_").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Name of the label carrying the device id (default: "device").
    #[serde(default = "default_device_label")]
    pub device_label: String,
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "mqtt_".to_string()
}

fn default_device_label() -> String {
    "device".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
            device_label: default_device_label(),
        }
    }
}

impl PrometheusConfig {
    /// Overlay `PROMETHEUS_PREFIX`, `DEVICE_LABEL` and `PROMETHEUS_PORT`.
    ///
    /// `PROMETHEUS_PORT` only replaces the port of the listen address.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup("PROMETHEUS_PREFIX") {
            self.prefix = prefix;
        }
        if let Some(label) = lookup("DEVICE_LABEL") {
            self.device_label = label;
        }
        if let Some(port) = lookup("PROMETHEUS_PORT") {
            let port: u16 = parse_env("PROMETHEUS_PORT", &port)?;
            let mut addr = self.listen_addr()?;
            addr.set_port(port);
            self.listen = addr.to_string();
        }
        Ok(())
    }

    /// Parse the listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables, then re-validate.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.mqtt.apply_env(&lookup)?;
        self.prometheus.apply_env(&lookup)?;
        self.logging.apply_env(&lookup)?;
        self.validate()
    }

    /// Overlay variables from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        self.prometheus.listen_addr()?;

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if !is_valid_metric_prefix(&self.prometheus.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prometheus.prefix
            )));
        }

        if !is_valid_label_name(&self.prometheus.device_label) {
            return Err(ConfigError::Validation(format!(
                "Invalid device label name: {}",
                self.prometheus.device_label
            )));
        }

        Ok(())
    }
}

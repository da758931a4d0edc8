//! Prometheus exporter for Zigbee2MQTT device telemetry.
//!
//! This crate subscribes to a Zigbee2MQTT topic namespace and turns every
//! numeric (or `ON`/`OFF`) payload field into a gauge labelled by device,
//! exposed via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   MQTT Broker   │────>│    Collector    │────>│   HTTP Server   │
//! │ (zigbee2mqtt/#) │     │(metric registry)│     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! A payload `{"temperature": 21.3, "state": "ON"}` on
//! `zigbee2mqtt/livingroom` yields:
//!
//! ```text
//! mqtt_temperature{device="livingroom"} 21.3
//! mqtt_state{device="livingroom"} 1.0
//! ```
//!
//! # Usage
//!
//! ```bash
//! MQTT_ADDRESS=192.168.1.10 mqtt-exporter
//! mqtt-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod subscriber;

pub use collector::{CollectorStats, MessageOutcome, MetricCollector, SharedCollector};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use registry::MetricRegistry;
pub use subscriber::MqttSubscriber;

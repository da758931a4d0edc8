//! Dynamic registry of gauge instruments created from message content.
//!
//! Every distinct payload field name becomes one gauge family named
//! `{prefix}{field}` with a single label dimension carrying the device id.
//! Families are created on first sight and live until the registry is
//! dropped. The number of families is bounded only by the number of
//! distinct field names published on the bus, so devices that use
//! free-form field names grow the exposition without limit.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{debug, info, warn};

use crate::mapping::{build_metric_name, escape_label_value};

/// Help text attached to every generated metric.
pub const METRIC_HELP: &str = "metric generated from MQTT message";

/// Label set of a single sample: always exactly one `(key, device)` pair.
pub type DeviceLabels = Vec<(String, String)>;

/// A gauge family keyed by device label.
pub type GaugeFamily = Family<DeviceLabels, Gauge<f64, AtomicU64>>;

/// Name map and exposition registry, always mutated together.
#[derive(Default)]
struct Instruments {
    by_name: HashMap<String, GaugeFamily>,
    registry: Registry,
}

/// Thread-safe registry of dynamically created gauges.
///
/// The message path calls [`record_value`](Self::record_value); the scrape
/// path calls [`render`](Self::render). A family is inserted into the name
/// map and the exposition registry under one write lock, with its first
/// sample already set, so readers never observe a half-created instrument.
pub struct MetricRegistry {
    prefix: String,
    label_key: String,
    instruments: RwLock<Instruments>,
}

impl MetricRegistry {
    /// Create an empty registry.
    ///
    /// `prefix` is prepended to every field name, `label_key` is the name
    /// of the device label on every instrument.
    pub fn new(prefix: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            label_key: label_key.into(),
            instruments: RwLock::new(Instruments::default()),
        }
    }

    /// The metric name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The device label key.
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Set the value of `metric` for the device `label_value`.
    ///
    /// Creates the instrument on first use. The previous value for the same
    /// device is overwritten. Returns `true` if this call created the
    /// instrument.
    ///
    /// The device id is escaped here because the encoder writes label values
    /// verbatim.
    pub fn record_value(&self, metric: &str, label_value: &str, value: f64) -> bool {
        let name = build_metric_name(&self.prefix, metric);
        let labels = vec![(self.label_key.clone(), escape_label_value(label_value))];

        let existing = self.instruments.read().by_name.get(&name).cloned();
        let created = match existing {
            Some(family) => {
                family.get_or_create(&labels).set(value);
                false
            }
            None => self.create_and_set(&name, &labels, value),
        };

        debug!(
            metric = %name,
            device = label_value,
            value,
            "New value"
        );

        created
    }

    /// Slow path: take the write lock, re-check, create if still absent.
    fn create_and_set(&self, name: &str, labels: &DeviceLabels, value: f64) -> bool {
        let mut instruments = self.instruments.write();

        if let Some(family) = instruments.by_name.get(name) {
            // Another caller created it between our read and write locks.
            family.get_or_create(labels).set(value);
            return false;
        }

        let family = GaugeFamily::default();
        family.get_or_create(labels).set(value);
        instruments
            .registry
            .register(name, METRIC_HELP, family.clone());
        instruments.by_name.insert(name.to_string(), family);

        info!(
            metric = %name,
            label = %self.label_key,
            total = instruments.by_name.len(),
            "Creating prometheus metric"
        );

        true
    }

    /// Whether an instrument exists for the given field name.
    pub fn contains(&self, metric: &str) -> bool {
        let name = build_metric_name(&self.prefix, metric);
        self.instruments.read().by_name.contains_key(&name)
    }

    /// Number of instruments created so far.
    pub fn instrument_count(&self) -> usize {
        self.instruments.read().by_name.len()
    }

    /// Full names of all instruments, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instruments.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Render all instruments in the OpenMetrics text format.
    pub fn render(&self) -> String {
        let instruments = self.instruments.read();
        let mut output = String::with_capacity(instruments.by_name.len() * 128);

        if let Err(e) = encode(&mut output, &instruments.registry) {
            warn!(error = %e, "Failed to encode metrics");
        }

        output
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("prefix", &self.prefix)
            .field("label_key", &self.label_key)
            .field("instruments", &self.instrument_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> MetricRegistry {
        MetricRegistry::new("mqtt_", "device")
    }

    /// Find the value of `metric{device="..."}` in rendered output.
    fn sample(output: &str, metric: &str, device: &str) -> Option<f64> {
        let series = format!("{}{{device=\"{}\"}} ", metric, device);
        output
            .lines()
            .find_map(|line| line.strip_prefix(&series))
            .and_then(|value| value.trim().parse().ok())
    }

    #[test]
    fn test_first_record_creates_instrument() {
        let registry = registry();

        assert!(!registry.contains("temp"));
        assert!(registry.record_value("temp", "sensorA", 20.0));
        assert!(registry.contains("temp"));
        assert_eq!(registry.instrument_count(), 1);
        assert_eq!(registry.metric_names(), vec!["mqtt_temp".to_string()]);
    }

    #[test]
    fn test_repeated_records_create_once() {
        let registry = registry();

        let created: Vec<bool> = (0..5)
            .map(|i| registry.record_value("temp", "sensorA", i as f64))
            .collect();

        assert_eq!(created, vec![true, false, false, false, false]);
        assert_eq!(registry.instrument_count(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let registry = registry();

        registry.record_value("temp", "sensorA", 20.0);
        registry.record_value("temp", "sensorA", 21.5);

        let output = registry.render();
        assert_eq!(sample(&output, "mqtt_temp", "sensorA"), Some(21.5));
    }

    #[test]
    fn test_label_independence() {
        let registry = registry();

        registry.record_value("temp", "sensorA", 20.0);
        registry.record_value("temp", "sensorB", 5.0);

        let output = registry.render();
        assert_eq!(registry.instrument_count(), 1);
        assert_eq!(sample(&output, "mqtt_temp", "sensorA"), Some(20.0));
        assert_eq!(sample(&output, "mqtt_temp", "sensorB"), Some(5.0));
    }

    #[test]
    fn test_render_contains_type_and_help() {
        let registry = registry();
        registry.record_value("battery", "livingroom", 1.0);

        let output = registry.render();
        assert!(output.contains("# TYPE mqtt_battery gauge"));
        assert!(output.contains("# HELP mqtt_battery metric generated from MQTT message"));
        assert!(output.ends_with("# EOF\n"));
    }

    #[test]
    fn test_render_empty_registry() {
        let output = registry().render();
        assert_eq!(output, "# EOF\n");
    }

    #[test]
    fn test_custom_label_key_and_prefix() {
        let registry = MetricRegistry::new("z2m_", "friendly_name");
        registry.record_value("humidity", "bathroom", 61.0);

        let output = registry.render();
        assert!(output.contains("z2m_humidity{friendly_name=\"bathroom\"} 61"));
        assert_eq!(registry.prefix(), "z2m_");
        assert_eq!(registry.label_key(), "friendly_name");
    }

    #[test]
    fn test_device_id_is_escaped_in_exposition() {
        let registry = registry();
        registry.record_value("temp", "living \"room\"\nx", 1.0);
        registry.record_value("temp", r"back\slash", 2.0);

        let output = registry.render();
        assert!(output.contains(r#"mqtt_temp{device="living \"room\"\nx"} 1.0"#));
        assert!(output.contains(r#"mqtt_temp{device="back\\slash"} 2.0"#));

        // Every sample stays on one line with a balanced label set.
        for line in output.lines().filter(|line| !line.starts_with('#')) {
            let (series, value) = line.rsplit_once(' ').unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad sample line: {}", line);
            assert!(series.starts_with("mqtt_temp{device=\""));
            assert!(series.ends_with("\"}"));
        }
    }

    #[test]
    fn test_invalid_field_characters_are_sanitized() {
        let registry = registry();
        registry.record_value("color.x", "bulb", 0.5);

        assert!(registry.contains("color.x"));
        assert_eq!(registry.metric_names(), vec!["mqtt_color_x".to_string()]);
    }

    #[test]
    fn test_concurrent_first_sighting_creates_one_instrument() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let device = format!("sensor{}", i);
                    registry.record_value("temp", &device, i as f64)
                })
            })
            .collect();

        let creations = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(creations, 1);
        assert_eq!(registry.instrument_count(), 1);

        // No update is lost: every device has its own sample.
        let output = registry.render();
        for i in 0..8 {
            assert_eq!(
                sample(&output, "mqtt_temp", &format!("sensor{}", i)),
                Some(i as f64)
            );
        }
    }

    #[test]
    fn test_render_while_writing() {
        let registry = Arc::new(registry());

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    registry.record_value(&format!("field_{}", i % 20), "device", i as f64);
                }
            })
        };

        for _ in 0..50 {
            let output = registry.render();
            assert!(output.ends_with("# EOF\n"));
        }

        writer.join().unwrap();
        assert_eq!(registry.instrument_count(), 20);
    }
}

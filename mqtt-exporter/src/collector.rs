//! Message collector that turns MQTT messages into gauge updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mqtt_exporter_common::reading::MessageDecoder;
use tracing::{trace, warn};

use crate::mapping::coerce;
use crate::registry::MetricRegistry;

/// Result of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The payload was decoded; counts refer to its fields.
    Recorded {
        /// Fields written to the registry.
        recorded: usize,
        /// Fields skipped because they could not be coerced.
        skipped: usize,
    },
    /// The payload could not be decoded and was dropped.
    Rejected,
}

/// Collector statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Total messages received.
    pub messages_received: u64,
    /// Messages dropped because the payload was not a JSON object.
    pub messages_rejected: u64,
    /// Field values written to the registry.
    pub fields_recorded: u64,
    /// Field values skipped because they were not numeric.
    pub fields_skipped: u64,
    /// Instruments created.
    pub instruments_created: u64,
}

#[derive(Default)]
struct Counters {
    messages_received: AtomicU64,
    messages_rejected: AtomicU64,
    fields_recorded: AtomicU64,
    fields_skipped: AtomicU64,
    instruments_created: AtomicU64,
}

/// Thread-safe message collector.
///
/// Every per-message failure is logged and counted; nothing is propagated
/// to the caller, so one bad message never stops the message loop.
pub struct MetricCollector {
    decoder: MessageDecoder,
    registry: Arc<MetricRegistry>,
    counters: Counters,
}

impl MetricCollector {
    /// Create a new collector writing into `registry`.
    pub fn new(decoder: MessageDecoder, registry: Arc<MetricRegistry>) -> Self {
        Self {
            decoder,
            registry,
            counters: Counters::default(),
        }
    }

    /// Handle one message delivered on `topic`.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> MessageOutcome {
        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        let reading = match self.decoder.decode(topic, payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.counters
                    .messages_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic,
                    payload = %String::from_utf8_lossy(payload),
                    error = %e,
                    "Failed to parse message payload"
                );
                return MessageOutcome::Rejected;
            }
        };

        trace!(
            topic,
            device = %reading.device_id,
            fields = reading.len(),
            "Received reading"
        );

        let mut recorded = 0;
        let mut skipped = 0;

        for (field, raw) in reading.iter() {
            let value = match coerce(field, raw) {
                Ok(value) => value,
                Err(e) => {
                    skipped += 1;
                    warn!(
                        device = %reading.device_id,
                        field,
                        value = %raw,
                        error = %e,
                        "Failed to convert field"
                    );
                    continue;
                }
            };

            if self.registry.record_value(field, &reading.device_id, value) {
                self.counters
                    .instruments_created
                    .fetch_add(1, Ordering::Relaxed);
            }
            recorded += 1;
        }

        self.counters
            .fields_recorded
            .fetch_add(recorded as u64, Ordering::Relaxed);
        self.counters
            .fields_skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);

        MessageOutcome::Recorded { recorded, skipped }
    }

    /// The registry this collector writes into.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// The decoder used for incoming messages.
    pub fn decoder(&self) -> &MessageDecoder {
        &self.decoder
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            messages_rejected: self.counters.messages_rejected.load(Ordering::Relaxed),
            fields_recorded: self.counters.fields_recorded.load(Ordering::Relaxed),
            fields_skipped: self.counters.fields_skipped.load(Ordering::Relaxed),
            instruments_created: self.counters.instruments_created.load(Ordering::Relaxed),
        }
    }

    /// Render the registry for scraping.
    pub fn render(&self) -> String {
        self.registry.render()
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<MetricCollector>;

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricCollector {
        MetricCollector::new(
            MessageDecoder::default(),
            Arc::new(MetricRegistry::new("mqtt_", "device")),
        )
    }

    #[test]
    fn test_handle_valid_message() {
        let collector = collector();

        let outcome = collector.handle_message(
            "zigbee2mqtt/livingroom",
            br#"{"temperature": 21.3, "battery": "ON"}"#,
        );

        assert_eq!(
            outcome,
            MessageOutcome::Recorded {
                recorded: 2,
                skipped: 0
            }
        );
        assert!(collector.registry().contains("temperature"));
        assert!(collector.registry().contains("battery"));

        let output = collector.render();
        assert!(output.contains("mqtt_temperature{device=\"livingroom\"} 21.3"));
        assert!(output.contains("mqtt_battery{device=\"livingroom\"} 1.0"));
    }

    #[test]
    fn test_handle_non_numeric_field() {
        let collector = collector();

        let outcome =
            collector.handle_message("zigbee2mqtt/livingroom", br#"{"linkquality": "unknown"}"#);

        assert_eq!(
            outcome,
            MessageOutcome::Recorded {
                recorded: 0,
                skipped: 1
            }
        );
        assert!(!collector.registry().contains("linkquality"));
        assert_eq!(collector.registry().instrument_count(), 0);
    }

    #[test]
    fn test_handle_skips_only_bad_field() {
        let collector = collector();

        collector.handle_message(
            "zigbee2mqtt/plug",
            br#"{"power": 12.5, "update": {"state": "idle"}, "state": "OFF"}"#,
        );

        let registry = collector.registry();
        assert!(registry.contains("power"));
        assert!(registry.contains("state"));
        assert!(!registry.contains("update"));

        let stats = collector.stats();
        assert_eq!(stats.fields_recorded, 2);
        assert_eq!(stats.fields_skipped, 1);
    }

    #[test]
    fn test_handle_invalid_payload() {
        let collector = collector();

        let outcome = collector.handle_message("zigbee2mqtt/livingroom", b"not-json");

        assert_eq!(outcome, MessageOutcome::Rejected);
        assert_eq!(collector.registry().instrument_count(), 0);
        assert_eq!(collector.render(), "# EOF\n");

        let stats = collector.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_rejected, 1);
    }

    #[test]
    fn test_continues_after_invalid_payload() {
        let collector = collector();

        collector.handle_message("zigbee2mqtt/a", b"not-json");
        collector.handle_message("zigbee2mqtt/a", br#"{"temperature": 19}"#);

        assert!(collector.registry().contains("temperature"));
        assert_eq!(collector.stats().messages_received, 2);
    }

    #[test]
    fn test_stats_count_instrument_creation() {
        let collector = collector();

        collector.handle_message("zigbee2mqtt/a", br#"{"temperature": 19, "humidity": 40}"#);
        collector.handle_message("zigbee2mqtt/b", br#"{"temperature": 22}"#);

        let stats = collector.stats();
        assert_eq!(stats.instruments_created, 2);
        assert_eq!(stats.fields_recorded, 3);
        assert_eq!(stats.messages_rejected, 0);
    }
}

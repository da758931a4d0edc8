use crate::error::{Error, Result};

/// Default topic namespace published by a Zigbee-to-MQTT bridge.
pub const DEFAULT_NAMESPACE: &str = "zigbee2mqtt";

/// A topic namespace such as `zigbee2mqtt`.
///
/// Device topics follow the pattern `<namespace>/<device>`. The device part
/// may itself contain `/` (e.g. `zigbee2mqtt/kitchen/sensor`), in which case
/// everything after the namespace separator is the device identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    prefix: String,
}

impl TopicNamespace {
    /// Create a namespace, validating that it is usable as an MQTT topic level.
    ///
    /// # Example
    /// ```
    /// use mqtt_exporter_common::topic::TopicNamespace;
    ///
    /// let ns = TopicNamespace::new("zigbee2mqtt").unwrap();
    /// assert_eq!(ns.subscription_filter(), "zigbee2mqtt/#");
    /// ```
    pub fn new(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            prefix: format!("{}/", namespace.trim_end_matches('/')),
        })
    }

    /// The namespace without the trailing separator.
    pub fn as_str(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    /// The subscription filter covering every topic under the namespace.
    pub fn subscription_filter(&self) -> String {
        format!("{}#", self.prefix)
    }

    /// Derive the device identifier from a topic.
    ///
    /// The namespace prefix is stripped from the start of the topic. Topics
    /// outside the namespace are passed through unchanged.
    ///
    /// # Example
    /// ```
    /// use mqtt_exporter_common::topic::TopicNamespace;
    ///
    /// let ns = TopicNamespace::default();
    /// assert_eq!(ns.device_id("zigbee2mqtt/livingroom"), "livingroom");
    /// assert_eq!(ns.device_id("other/livingroom"), "other/livingroom");
    /// ```
    pub fn device_id<'a>(&self, topic: &'a str) -> &'a str {
        match topic.strip_prefix(&self.prefix) {
            Some(device) => device,
            None => {
                tracing::debug!(
                    topic,
                    namespace = self.as_str(),
                    "Topic outside namespace, using it as device id"
                );
                topic
            }
        }
    }

    /// Whether the topic lives under this namespace.
    pub fn contains(&self, topic: &str) -> bool {
        topic.starts_with(&self.prefix)
    }
}

impl Default for TopicNamespace {
    fn default() -> Self {
        Self {
            prefix: format!("{}/", DEFAULT_NAMESPACE),
        }
    }
}

/// Check that a namespace can be used to build a subscription filter.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let trimmed = namespace.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Topic("namespace must not be empty".to_string()));
    }
    if trimmed.contains(['#', '+']) {
        return Err(Error::Topic(format!(
            "namespace '{}' must not contain MQTT wildcards",
            namespace
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filter() {
        let ns = TopicNamespace::new("zigbee2mqtt").unwrap();
        assert_eq!(ns.subscription_filter(), "zigbee2mqtt/#");

        let ns = TopicNamespace::new("home/zigbee/").unwrap();
        assert_eq!(ns.subscription_filter(), "home/zigbee/#");
        assert_eq!(ns.as_str(), "home/zigbee");
    }

    #[test]
    fn test_device_id_strips_prefix() {
        let ns = TopicNamespace::default();
        assert_eq!(ns.device_id("zigbee2mqtt/livingroom"), "livingroom");
        assert_eq!(ns.device_id("zigbee2mqtt/kitchen/sensor"), "kitchen/sensor");
    }

    #[test]
    fn test_device_id_only_strips_leading_prefix() {
        let ns = TopicNamespace::default();
        assert_eq!(
            ns.device_id("zigbee2mqtt/zigbee2mqtt/nested"),
            "zigbee2mqtt/nested"
        );
    }

    #[test]
    fn test_device_id_passthrough_outside_namespace() {
        let ns = TopicNamespace::default();
        assert_eq!(ns.device_id("tasmota/plug"), "tasmota/plug");
        assert_eq!(ns.device_id("zigbee2mqtt"), "zigbee2mqtt");
        assert!(!ns.contains("zigbee2mqtt"));
        assert!(ns.contains("zigbee2mqtt/plug"));
    }

    #[test]
    fn test_invalid_namespaces() {
        assert!(TopicNamespace::new("").is_err());
        assert!(TopicNamespace::new("/").is_err());
        assert!(TopicNamespace::new("zigbee2mqtt/#").is_err());
        assert!(TopicNamespace::new("home/+/zigbee").is_err());
    }
}

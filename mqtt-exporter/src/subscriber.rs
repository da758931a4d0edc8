//! MQTT subscriber feeding messages into the collector.

use std::time::Duration;

use mqtt_exporter_common::config::MqttConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::collector::SharedCollector;

/// Largest packet accepted from or sent to the broker.
///
/// Bridge topics such as `zigbee2mqtt/bridge/devices` carry large payloads.
pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 10;

/// How long to keep polling after DISCONNECT so the packet gets flushed.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT subscriber that feeds messages to the collector.
pub struct MqttSubscriber {
    collector: SharedCollector,
    mqtt_config: MqttConfig,
    topic_filter: String,
}

impl MqttSubscriber {
    /// Create a new subscriber for the collector's topic namespace.
    pub fn new(collector: SharedCollector, mqtt_config: MqttConfig) -> Self {
        let topic_filter = collector.decoder().namespace().subscription_filter();
        Self {
            collector,
            mqtt_config,
            topic_filter,
        }
    }

    /// Set a custom topic filter to subscribe to.
    pub fn with_topic_filter(mut self, topic_filter: impl Into<String>) -> Self {
        self.topic_filter = topic_filter.into();
        self
    }

    /// The topic filter subscribed on every connection.
    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    /// Build the client options from the configuration.
    pub fn mqtt_options(&self) -> MqttOptions {
        let config = &self.mqtt_config;
        let mut options =
            MqttOptions::new(config.effective_client_id(), &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_clean_session(true);

        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            options.set_credentials(username, password);
        }

        options
    }

    /// Run the subscriber until the shutdown signal is received.
    ///
    /// Connection errors are logged and retried after the configured delay;
    /// the event loop reconnects on the next poll.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        let retry_delay = Duration::from_secs(self.mqtt_config.reconnect_delay_secs);

        info!(
            host = %self.mqtt_config.host,
            port = self.mqtt_config.port,
            topic = %self.topic_filter,
            "Connecting to MQTT broker"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping subscriber");
                        break;
                    }
                }

                event = eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(&client, event),
                        Err(e) => {
                            warn!(error = %e, "MQTT connection error");
                            if sleep_or_shutdown(&mut shutdown, retry_delay).await {
                                info!("Shutdown signal received, stopping subscriber");
                                break;
                            }
                        }
                    }
                }
            }
        }

        disconnect(&client, &mut eventloop).await;

        info!("Subscriber stopped");
        Ok(())
    }

    fn handle_event(&self, client: &AsyncClient, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(code = ?ack.code, "Connected to MQTT broker");
                // Subscribe on every connection so reconnects restore it.
                match client.try_subscribe(&self.topic_filter, QoS::AtMostOnce) {
                    Ok(()) => info!(topic = %self.topic_filter, "Subscribing"),
                    Err(e) => warn!(topic = %self.topic_filter, error = %e, "Failed to subscribe"),
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(return_codes = ?ack.return_codes, "Subscription acknowledged");
            }
            Event::Incoming(Packet::Publish(publish)) => {
                trace!(
                    topic = %publish.topic,
                    payload_len = publish.payload.len(),
                    "Received message"
                );
                self.collector
                    .handle_message(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the connection");
            }
            other => {
                trace!(event = ?other, "MQTT event");
            }
        }
    }
}

/// Wait out the retry delay; `true` if shutdown was requested meanwhile.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Send DISCONNECT and drive the event loop until it is written out.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "Failed to queue disconnect");
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Event loop ended while disconnecting");
                    break;
                }
            }
        }
    })
    .await;

    if flushed.is_err() {
        debug!("Timed out waiting for disconnect to be sent");
    }
}

//! MQTT subscriber loop

use super::{client_options, qos_level, MessageHandler};
use crate::config::MqttConfig;
use crate::error::MqttError;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for the DISCONNECT packet to go out
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Subscribes to a set of topics and forwards every message to a handler
pub struct MqttSubscriber {
    config: MqttConfig,
    topics: Vec<String>,
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
    connected: Arc<AtomicBool>,
}

impl MqttSubscriber {
    /// Create a subscriber; nothing connects until [`run`](Self::run)
    pub fn new(config: &MqttConfig, topics: Vec<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            qos: qos_level(config.qos),
            config: config.clone(),
            topics,
            handler,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared connection flag, updated by the event loop
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Whether the broker session is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Topics this subscriber listens on
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Drive the subscription until shutdown
    ///
    /// Connection errors are retried after the configured backoff. Every
    /// successful CONNACK triggers a fresh subscription to all topics, so a
    /// broker restart does not silently drop the feed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), MqttError> {
        let options = client_options(&self.config, &self.config.subscriber_client_id);
        let (client, mut event_loop) = AsyncClient::new(options, self.config.channel_capacity);
        let address = self.config.address();
        let backoff = self.config.reconnect_backoff();

        info!(broker = %address, topics = ?self.topics, "Starting MQTT subscriber");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("MQTT subscriber shutting down");
                    break;
                }
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            warn!(broker = %address, code = ?ack.code, "Broker refused connection");
                            continue;
                        }
                        self.connected.store(true, Ordering::Relaxed);
                        info!(broker = %address, "Connected to MQTT broker");
                        for topic in &self.topics {
                            match client.try_subscribe(topic.as_str(), self.qos) {
                                Ok(()) => info!(topic = %topic, "Subscribed"),
                                Err(e) => error!(topic = %topic, error = %e, "Failed to subscribe"),
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, bytes = publish.payload.len(), "Message received");
                        self.handler.handle(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if self.connected.swap(false, Ordering::Relaxed) {
                            warn!(broker = %address, error = %e, "Lost connection to MQTT broker");
                        } else {
                            debug!(broker = %address, error = %e, "MQTT connection attempt failed");
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.recv() => {
                                info!("MQTT subscriber shutting down");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        if self.connected.swap(false, Ordering::Relaxed) {
            client.try_disconnect()?;
            let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
            if flushed.is_err() {
                warn!("Timed out sending MQTT disconnect");
            }
        }
        Ok(())
    }
}

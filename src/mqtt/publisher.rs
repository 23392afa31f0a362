//! MQTT publisher with a background event loop

use super::{client_options, qos_level, MessagePublisher};
use crate::config::MqttConfig;
use crate::error::MqttError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `disconnect` waits for the DISCONNECT packet to go out
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Publishes messages to the broker
///
/// The event loop runs on its own task and reconnects after errors; publish
/// attempts while the session is down fail with [`MqttError::NotConnected`].
pub struct MqttPublisher {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    event_loop: Option<JoinHandle<()>>,
    qos: QoS,
    address: String,
}

impl MqttPublisher {
    /// Connect and wait for the broker to accept the session
    pub async fn connect(config: &MqttConfig) -> Result<Self, MqttError> {
        let client_id = config
            .publisher_client_id
            .clone()
            .unwrap_or_else(|| format!("telemetry-pub-{}", uuid::Uuid::new_v4().simple()));
        let options = client_options(config, &client_id);
        let (client, event_loop) = AsyncClient::new(options, config.channel_capacity);

        let (tx, mut rx) = watch::channel(false);
        let address = config.address();
        let handle = tokio::spawn(drive_event_loop(
            event_loop,
            tx,
            address.clone(),
            config.reconnect_backoff(),
        ));

        // The watch guard borrows `rx`; reduce it to a bool before `rx` moves
        let connected = {
            let waited = tokio::time::timeout(config.connect_timeout(), rx.wait_for(|up| *up)).await;
            matches!(waited, Ok(Ok(_)))
        };
        if !connected {
            handle.abort();
            return Err(MqttError::ConnectTimeout(address));
        }
        info!(broker = %address, client_id = %client_id, "Publisher connected to MQTT broker");

        Ok(Self {
            client,
            connected: rx,
            event_loop: Some(handle),
            qos: qos_level(config.qos),
            address,
        })
    }

    /// Whether the broker session is currently up
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Publish a payload
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        self.client.publish(topic, self.qos, false, payload).await?;
        debug!(topic = %topic, "Message queued");
        Ok(())
    }

    /// Flush queued messages, send DISCONNECT and stop the event loop
    pub async fn disconnect(mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Failed to queue MQTT disconnect");
        }
        if let Some(handle) = self.event_loop.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DISCONNECT_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }
        info!(broker = %self.address, "Publisher disconnected");
    }
}

#[async_trait]
impl MessagePublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        MqttPublisher::publish(self, topic, payload).await
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

/// Poll the event loop until our DISCONNECT has been written
async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: watch::Sender<bool>,
    address: String,
    backoff: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected.send_replace(true);
                } else {
                    warn!(broker = %address, code = ?ack.code, "Broker refused connection");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.send_replace(false);
                debug!("Publisher event loop finished");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.send_replace(false) {
                    warn!(broker = %address, error = %e, "Publisher lost broker connection");
                } else {
                    debug!(broker = %address, error = %e, "Publisher connection attempt failed");
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_times_out_without_broker() {
        // Nothing listens on port 1 on the loopback interface
        let config = MqttConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout_secs: 1,
            reconnect_backoff_ms: 100,
            ..Default::default()
        };
        let result = MqttPublisher::connect(&config).await;
        assert!(matches!(result, Err(MqttError::ConnectTimeout(addr)) if addr == "127.0.0.1:1"));
    }
}

//! MQTT transport
//!
//! Thin wrappers over `rumqttc` that own the event loop task, track whether
//! the broker session is up, and hand incoming publishes to a
//! [`MessageHandler`].

pub mod publisher;
pub mod subscriber;

pub use publisher::MqttPublisher;
pub use subscriber::MqttSubscriber;

use crate::config::MqttConfig;
use crate::error::MqttError;
use async_trait::async_trait;
use rumqttc::{MqttOptions, QoS};

/// Receives every publish delivered to a subscriber
///
/// Implementations own their error handling: a failing message must not stop
/// the subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Sends messages to the broker
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one payload
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;
}

/// Map a numeric QoS level to the client enum
pub fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Client options for a broker connection
pub(crate) fn client_options(config: &MqttConfig, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    options
}

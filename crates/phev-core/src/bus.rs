//! Message bus trait

use async_trait::async_trait;

use crate::error::BusError;

/// Delivery guarantee for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Publish side of the messaging client.
///
/// Subscriptions and the last-will message are configured by whoever owns
/// the client connection; the engine only ever publishes.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish and wait until the client has accepted the message
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), BusError>;
}

//! Deduplicating topic publisher

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use phev_core::{BusError, MessageBus, QoS};
use tracing::debug;

/// Last payload published per gateway-relative topic.
///
/// Never cleared, so a reconnect does not republish unchanged state.
#[derive(Debug, Default)]
pub struct TopicCache {
    entries: RwLock<HashMap<String, String>>,
}

impl TopicCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, topic: &str) -> Option<String> {
        self.entries.read().get(topic).cloned()
    }

    fn matches(&self, topic: &str, payload: &str) -> bool {
        self.entries
            .read()
            .get(topic)
            .is_some_and(|cached| cached == payload)
    }

    pub(crate) fn insert(&self, topic: &str, payload: &str) {
        self.entries
            .write()
            .insert(topic.to_string(), payload.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Publishes state topics through the bus, skipping unchanged payloads
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    cache: TopicCache,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            cache: TopicCache::new(),
        }
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn cache(&self) -> &TopicCache {
        &self.cache
    }

    /// Publish `payload` at `prefix + topic` unless it equals the cached
    /// value. The cache is only updated after the bus accepted the write.
    ///
    /// Returns whether a bus write was issued.
    pub async fn publish(
        &self,
        prefix: &str,
        topic: &str,
        payload: &str,
    ) -> Result<bool, BusError> {
        if self.cache.matches(topic, payload) {
            return Ok(false);
        }

        let full_topic = format!("{}{}", prefix, topic);
        self.bus
            .publish(&full_topic, QoS::AtMostOnce, false, payload)
            .await?;
        self.cache.insert(topic, payload);
        debug!(topic = %full_topic, payload, "Published");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phev_core::mock::RecordingBus;

    #[tokio::test]
    async fn test_duplicate_payload_published_once() {
        let bus = Arc::new(RecordingBus::new());
        let publisher = Publisher::new(bus.clone());

        assert!(publisher.publish("phev", "/battery/level", "80").await.unwrap());
        assert!(!publisher.publish("phev", "/battery/level", "80").await.unwrap());
        assert!(publisher.publish("phev", "/battery/level", "81").await.unwrap());

        assert_eq!(bus.payloads_for("phev/battery/level"), vec!["80", "81"]);
        let message = &bus.messages()[0];
        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(!message.retain);
    }

    #[tokio::test]
    async fn test_failed_publish_not_cached() {
        let bus = Arc::new(RecordingBus::new());
        let publisher = Publisher::new(bus.clone());

        bus.set_failing(true);
        assert!(publisher.publish("phev", "/vin", "JMA").await.is_err());
        assert!(publisher.cache().get("/vin").is_none());

        bus.set_failing(false);
        assert!(publisher.publish("phev", "/vin", "JMA").await.unwrap());
        assert_eq!(publisher.cache().get("/vin").as_deref(), Some("JMA"));
    }
}

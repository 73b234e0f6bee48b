//! In-memory device and bus doubles
//!
//! `MockDevice` stands in for the vehicle: it accepts connections (unless
//! marked unreachable), records every register write and outbound message,
//! and lets tests inject inbound messages into the current link.
//! `RecordingBus` records every publish.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::bus::{MessageBus, QoS};
use crate::device::{DeviceConnector, DeviceHandle, DeviceLink, DeviceSettings};
use crate::error::{BusError, DeviceError};
use crate::message::{DeviceMessage, OutboundMessage};
use crate::register::ModelYear;

const INBOUND_CAPACITY: usize = 256;

/// Simulated vehicle
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<MockState>,
}

struct MockState {
    model_year: ModelYear,
    connect_latency: RwLock<Duration>,
    reachable: AtomicBool,
    fail_start: AtomicBool,
    fail_writes: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    generation: AtomicU64,
    /// Messages delivered on every new link, in order
    script: RwLock<Vec<DeviceMessage>>,
    writes: RwLock<Vec<(u8, Vec<u8>)>>,
    sent: RwLock<Vec<OutboundMessage>>,
    link: Mutex<Option<(u64, mpsc::Sender<DeviceMessage>)>>,
}

impl MockDevice {
    pub fn new(model_year: ModelYear) -> Self {
        Self {
            state: Arc::new(MockState {
                model_year,
                connect_latency: RwLock::new(Duration::ZERO),
                reachable: AtomicBool::new(true),
                fail_start: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                script: RwLock::new(Vec::new()),
                writes: RwLock::new(Vec::new()),
                sent: RwLock::new(Vec::new()),
                link: Mutex::new(None),
            }),
        }
    }

    /// Messages replayed to the gateway each time a link opens
    pub fn with_script(self, script: Vec<DeviceMessage>) -> Self {
        *self.state.script.write() = script;
        self
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        *self.state.connect_latency.write() = latency;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of `close` calls on any handle
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// All register writes, in order
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.writes.read().clone()
    }

    /// Register writes to one register
    pub fn writes_to(&self, register: u8) -> Vec<Vec<u8>> {
        self.state
            .writes
            .read()
            .iter()
            .filter(|(r, _)| *r == register)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// All raw outbound messages (acknowledgements), in order
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.sent.read().clone()
    }

    pub fn is_linked(&self) -> bool {
        self.state.link.lock().is_some()
    }

    /// Deliver a message on the current link.
    ///
    /// Returns false if no link is open.
    pub async fn inject(&self, message: DeviceMessage) -> bool {
        let tx = self.state.link.lock().as_ref().map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the vehicle dropping the connection
    pub fn drop_link(&self) {
        self.state.link.lock().take();
    }
}

#[async_trait]
impl DeviceConnector for MockDevice {
    async fn connect(&self, settings: &DeviceSettings) -> Result<DeviceLink, DeviceError> {
        let latency = *self.state.connect_latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(DeviceError::ConnectionFailed(format!(
                "{}: no route to host",
                settings.address
            )));
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        for message in self.state.script.read().iter() {
            let _ = tx.try_send(message.clone());
        }

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.link.lock() = Some((generation, tx));
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(address = %settings.address, generation, "Mock device: link opened");

        Ok(DeviceLink {
            handle: Arc::new(MockHandle {
                state: self.state.clone(),
                generation,
            }),
            inbound: rx,
        })
    }
}

struct MockHandle {
    state: Arc<MockState>,
    generation: u64,
}

impl MockHandle {
    fn ensure_open(&self) -> Result<(), DeviceError> {
        match self.state.link.lock().as_ref() {
            Some((generation, _)) if *generation == self.generation => Ok(()),
            _ => Err(DeviceError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl DeviceHandle for MockHandle {
    async fn start(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::StartFailed("handshake rejected".to_string()));
        }
        Ok(())
    }

    async fn set_register(&self, register: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::WriteFailed {
                register,
                reason: "no acknowledgement".to_string(),
            });
        }
        self.state.writes.write().push((register, data.to_vec()));
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.state.sent.write().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        let mut link = self.state.link.lock();
        if matches!(link.as_ref(), Some((generation, _)) if *generation == self.generation) {
            link.take();
        }
    }

    fn model_year(&self) -> ModelYear {
        self.state.model_year
    }
}

/// A publish captured by [`RecordingBus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: String,
}

/// Message bus that records everything it is asked to publish
#[derive(Default)]
pub struct RecordingBus {
    messages: RwLock<Vec<Published>>,
    failing: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.read().clone()
    }

    pub fn count_for(&self, topic: &str) -> usize {
        self.messages.read().iter().filter(|m| m.topic == topic).count()
    }

    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.payloads_for(topic).pop()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        self.messages.write().push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    #[tokio::test]
    async fn test_unreachable_device_refuses_connection() {
        let device = MockDevice::new(ModelYear::My18);
        device.set_reachable(false);

        let result = device.connect(&DeviceSettings::default()).await;
        assert!(matches!(result, Err(DeviceError::ConnectionFailed(_))));
        assert_eq!(device.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_inbound_stream() {
        let device = MockDevice::new(ModelYear::My18);
        let mut link = device.connect(&DeviceSettings::default()).await.unwrap();

        assert!(device.inject(DeviceMessage::bad_encoding()).await);
        link.handle.close().await;

        let first = link.inbound.recv().await.unwrap();
        assert_eq!(first.kind, MessageKind::BadEncoding);
        assert!(link.inbound.recv().await.is_none());
        assert!(link.handle.set_register(0x06, &[0x03]).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_close_new_link() {
        let device = MockDevice::new(ModelYear::My14);
        let old = device.connect(&DeviceSettings::default()).await.unwrap();
        let new = device.connect(&DeviceSettings::default()).await.unwrap();

        old.handle.close().await;
        assert!(device.is_linked());
        new.handle.set_register(0x0a, &[0x01]).await.unwrap();
        assert_eq!(device.writes_to(0x0a), vec![vec![0x01]]);
    }
}

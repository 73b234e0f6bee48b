//! Shared gateway context
//!
//! One `GatewayContext` is created at startup and passed to every
//! component. Mutable state lives behind a single `parking_lot::Mutex`
//! that is never held across an `.await`.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use phev_core::{BusError, DeviceConnector, DeviceHandle, MessageBus, QoS};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::climate::ClimateAggregator;
use crate::config::{ConfigHandle, GatewayConfig};
use crate::publish::{Publisher, TopicCache};
use crate::signal::Signal;

pub const AVAILABLE_TOPIC: &str = "/available";

/// Device connection bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// The gateway wants a connection; cleared after a failed attempt
    pub enabled: bool,
    /// A device session is established. Implies `enabled`.
    pub connected: bool,
    /// End of the last session that got connected, or startup.
    ///
    /// Failed connection attempts leave it untouched, so it measures time
    /// since the vehicle was last reachable.
    pub last_connect: Instant,
    /// Last attempt error, for edge-triggered logging
    pub last_error: Option<String>,
}

/// Remote radio bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerState {
    pub radio_on: bool,
    pub last_command: Option<Instant>,
    pub last_remote_restart: Option<Instant>,
}

struct SharedState {
    connection: ConnectionState,
    power: PowerState,
    session: Option<Arc<dyn DeviceHandle>>,
    /// Last settings dump reported by the vehicle
    last_settings: Option<String>,
    /// VIN discovery documents were published for
    discovered_vin: Option<String>,
}

pub struct GatewayContext {
    config: ConfigHandle,
    connector: Arc<dyn DeviceConnector>,
    publisher: Publisher,
    climate: Mutex<ClimateAggregator>,
    state: Mutex<SharedState>,
    /// Pre-empts the supervisor's duty or retry wait
    wake: Signal,
    /// Posted when a device session is established
    session_ready: Signal,
    /// Serialises radio on/off transitions
    radio: tokio::sync::Mutex<()>,
}

impl GatewayContext {
    pub fn new(
        config: ConfigHandle,
        bus: Arc<dyn MessageBus>,
        connector: Arc<dyn DeviceConnector>,
    ) -> Self {
        Self {
            config,
            connector,
            publisher: Publisher::new(bus),
            climate: Mutex::new(ClimateAggregator::new()),
            state: Mutex::new(SharedState {
                connection: ConnectionState {
                    enabled: false,
                    connected: false,
                    last_connect: Instant::now(),
                    last_error: None,
                },
                power: PowerState {
                    radio_on: false,
                    last_command: None,
                    last_remote_restart: None,
                },
                session: None,
                last_settings: None,
                discovered_vin: None,
            }),
            wake: Signal::new(),
            session_ready: Signal::new(),
            radio: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.current()
    }

    pub fn config_handle(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn connector(&self) -> &Arc<dyn DeviceConnector> {
        &self.connector
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        self.publisher.bus()
    }

    pub fn topics(&self) -> &TopicCache {
        self.publisher.cache()
    }

    pub fn wake(&self) -> &Signal {
        &self.wake
    }

    pub fn session_ready(&self) -> &Signal {
        &self.session_ready
    }

    pub(crate) fn radio_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.radio
    }

    pub fn climate(&self) -> MutexGuard<'_, ClimateAggregator> {
        self.climate.lock()
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Deduplicated state publish under the topic prefix. Failures are
    /// logged and leave the cache untouched.
    pub async fn publish(&self, topic: &str, payload: &str) {
        let prefix = self.config().mqtt.topic_prefix.clone();
        if let Err(e) = self.publisher.publish(&prefix, topic, payload).await {
            warn!(error = %e, topic, "State publish failed");
        }
    }

    /// Publish to an absolute topic, bypassing the cache
    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), BusError> {
        self.bus()
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
    }

    /// Retained `online` / `offline` at `/available`
    pub async fn publish_availability(&self, online: bool) {
        let topic = self.config().topic(AVAILABLE_TOPIC);
        let payload = if online { "online" } else { "offline" };
        match self.publish_raw(&topic, payload, true).await {
            Ok(()) => info!(status = payload, "Published availability"),
            Err(e) => warn!(error = %e, "Availability publish failed"),
        }
    }

    // ------------------------------------------------------------------
    // Connection state
    // ------------------------------------------------------------------

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection.clone()
    }

    /// Returns the previous value
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.lock();
        let previous = state.connection.enabled;
        state.connection.enabled = enabled;
        previous
    }

    /// Ask the supervisor to connect now
    pub fn request_connect(&self) {
        if !self.set_enabled(true) {
            info!("Connection disabled, enabling for command");
        }
        self.wake.notify();
    }

    pub fn session(&self) -> Option<Arc<dyn DeviceHandle>> {
        self.state.lock().session.clone()
    }

    pub(crate) fn session_started(&self, handle: Arc<dyn DeviceHandle>) {
        let mut state = self.state.lock();
        state.session = Some(handle);
        state.connection.connected = true;
        state.connection.enabled = true;
        state.connection.last_error = None;
    }

    /// Clear the session slot; stamps `last_connect` if it had connected
    pub(crate) fn session_ended(&self) {
        let mut state = self.state.lock();
        if state.connection.connected {
            state.connection.last_connect = Instant::now();
        }
        state.connection.connected = false;
        state.session = None;
    }

    /// Store the attempt error. Returns true if it differs from the last one.
    pub(crate) fn record_error(&self, error: &str) -> bool {
        let mut state = self.state.lock();
        if state.connection.last_error.as_deref() == Some(error) {
            return false;
        }
        state.connection.last_error = Some(error.to_string());
        true
    }

    // ------------------------------------------------------------------
    // Power state
    // ------------------------------------------------------------------

    pub fn power(&self) -> PowerState {
        self.state.lock().power.clone()
    }

    pub(crate) fn set_radio_on(&self, on: bool) {
        self.state.lock().power.radio_on = on;
    }

    pub(crate) fn record_command(&self) {
        self.state.lock().power.last_command = Some(Instant::now());
    }

    pub(crate) fn mark_remote_restart(&self) {
        self.state.lock().power.last_remote_restart = Some(Instant::now());
    }

    // ------------------------------------------------------------------
    // Vehicle reports
    // ------------------------------------------------------------------

    pub(crate) fn remember_settings(&self, settings: &str) {
        self.state.lock().last_settings = Some(settings.to_string());
    }

    pub(crate) fn take_settings(&self) -> Option<String> {
        self.state.lock().last_settings.take()
    }

    /// Record `vin` as discovered. Returns the VIN previously recorded.
    pub(crate) fn swap_discovered_vin(&self, vin: &str) -> Option<String> {
        self.state
            .lock()
            .discovered_vin
            .replace(vin.to_string())
    }

    pub(crate) fn discovered_vin(&self) -> Option<String> {
        self.state.lock().discovered_vin.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phev_core::mock::{MockDevice, RecordingBus};
    use phev_core::ModelYear;

    fn context() -> (GatewayContext, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        let ctx = GatewayContext::new(
            ConfigHandle::new(GatewayConfig::default()),
            bus.clone(),
            Arc::new(MockDevice::new(ModelYear::My18)),
        );
        (ctx, bus)
    }

    #[tokio::test]
    async fn test_availability_is_retained() {
        let (ctx, bus) = context();
        ctx.publish_availability(false).await;

        let message = &bus.messages()[0];
        assert_eq!(message.topic, "phev/available");
        assert_eq!(message.payload, "offline");
        assert!(message.retain);
    }

    #[test]
    fn test_record_error_is_edge_triggered() {
        let (ctx, _) = context();
        assert!(ctx.record_error("Connection closed"));
        assert!(!ctx.record_error("Connection closed"));
        assert!(ctx.record_error("Connection failed: timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_connect_only_stamped_after_connected_session() {
        let (ctx, _) = context();
        let started = ctx.connection().last_connect;

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        ctx.session_ended();
        assert_eq!(ctx.connection().last_connect, started);

        let device = MockDevice::new(ModelYear::My18);
        let link = device
            .connect(&phev_core::DeviceSettings::default())
            .await
            .unwrap();
        ctx.session_started(link.handle);
        assert!(ctx.connection().connected && ctx.connection().enabled);

        ctx.session_ended();
        assert!(ctx.connection().last_connect > started);
        assert!(ctx.session().is_none());
    }

    #[tokio::test]
    async fn test_request_connect_enables_and_wakes() {
        let (ctx, _) = context();
        ctx.request_connect();
        assert!(ctx.connection().enabled);
        assert!(ctx.wake().wait_timeout(std::time::Duration::from_millis(10)).await);
    }
}

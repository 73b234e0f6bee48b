//! Device client traits
//!
//! The vehicle's binary protocol and socket handling live behind these
//! traits. A connection is opened with [`DeviceConnector::connect`], which
//! yields a [`DeviceLink`]: a handle for writes plus the inbound message
//! stream. The stream ends when the link is lost or closed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::message::{DeviceMessage, OutboundMessage};
use crate::register::ModelYear;

/// Connection parameters for the device client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Vehicle address, `host:port`
    pub address: String,
    /// Maximum time for the protocol handshake
    pub start_timeout: Duration,
    /// Maximum time to wait for a register write acknowledgement
    pub register_timeout: Duration,
    pub tcp_read_timeout: Duration,
    pub tcp_write_timeout: Duration,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: "192.168.8.46:8080".to_string(),
            start_timeout: Duration::from_secs(20),
            register_timeout: Duration::from_secs(10),
            tcp_read_timeout: Duration::from_secs(30),
            tcp_write_timeout: Duration::from_secs(15),
        }
    }
}

/// An open connection to the vehicle
pub struct DeviceLink {
    pub handle: Arc<dyn DeviceHandle>,
    /// Decoded inbound messages; closed on link loss
    pub inbound: mpsc::Receiver<DeviceMessage>,
}

/// Opens connections to the vehicle
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, settings: &DeviceSettings) -> Result<DeviceLink, DeviceError>;
}

/// Operations on an open connection
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Perform the protocol handshake
    async fn start(&self) -> Result<(), DeviceError>;

    /// Write a register and wait for the vehicle to acknowledge it
    async fn set_register(&self, register: u8, data: &[u8]) -> Result<(), DeviceError>;

    /// Queue a raw protocol message on the outbound channel
    async fn send(&self, message: OutboundMessage) -> Result<(), DeviceError>;

    /// Close the connection; the inbound stream ends shortly after
    async fn close(&self);

    /// Model year detected during the handshake
    fn model_year(&self) -> ModelYear;
}

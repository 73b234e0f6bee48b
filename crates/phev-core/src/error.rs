//! Common error types for the device and bus collaborators

use thiserror::Error;

/// Errors reported by a device client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// TCP connection to the vehicle could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The link dropped or was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol handshake did not complete
    #[error("Start failed: {0}")]
    StartFailed(String),

    /// Register write was not acknowledged
    #[error("Register 0x{register:02x} write failed: {reason}")]
    WriteFailed { register: u8, reason: String },

    /// Timeout waiting for the vehicle
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Errors reported by the message bus
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },
}

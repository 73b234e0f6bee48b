//! Gateway error types

use std::path::PathBuf;

use phev_core::DeviceError;
use thiserror::Error;

pub use phev_core::BusError;

/// Why a device session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connect or handshake failed, or the device client reported an error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Inbound stream ended
    #[error("Connection closed")]
    ConnectionClosed,

    /// Too many undecodable frames inside the reset window
    #[error("Disconnecting due to too many encoding errors")]
    TooManyEncodingErrors,
}

/// Errors handling an inbound command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid payload for {topic}: {payload:?}")]
    InvalidPayload { topic: String, payload: String },

    #[error("Malformed hex in {0}")]
    MalformedHex(String),

    /// The device session did not come up within the command wait bound
    #[error("Device connection not ready")]
    NotReady,

    #[error("No active device session")]
    NoSession,

    #[error("Climate control is not supported for this model year")]
    UnsupportedModelYear,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing or empty
    #[error("{0} is required but not set")]
    MissingRequired(&'static str),

    #[error("Invalid config file {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors during a hot reload; the previous snapshot stays active
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),
}

//! phev-core - Core types and collaborator traits for the PHEV MQTT gateway
//!
//! This crate provides the abstractions the gateway engine is written
//! against: the decoded device message model, the device client and
//! message bus traits, and in-memory doubles for both.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌─────────────────────────┐
//! │   DeviceConnector    │        │       MessageBus        │
//! │  connect / start /   │        │  publish(topic, qos,    │
//! │  set_register / send │        │          retain, body)  │
//! └──────────┬───────────┘        └────────────┬────────────┘
//!            │ DeviceLink                      │
//!            │  (handle + inbound stream)      │
//!            ▼                                 ▼
//!     ┌───────────────────────────────────────────────┐
//!     │              phev-bridge engine               │
//!     └───────────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod device;
pub mod error;
pub mod message;
pub mod mock;
pub mod register;

pub use bus::{MessageBus, QoS};
pub use device::{DeviceConnector, DeviceHandle, DeviceLink, DeviceSettings};
pub use error::{BusError, DeviceError};
pub use message::{AckFlag, DeviceMessage, MessageKind, OutboundMessage};
pub use register::{registers, ClimateMode, ModelYear, PreAcState, RegisterValue};

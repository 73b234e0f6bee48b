//! phev-bridge - Session and power lifecycle engine for the PHEV MQTT gateway
//!
//! This crate keeps a connection to the vehicle's WiFi control link, turns
//! decoded register reports into MQTT topic state and routes inbound MQTT
//! commands back into register writes.
//!
//! # Architecture
//!
//! ```text
//!                ┌─────────────────────────────────────────┐
//!   duty timer ─►│          ConnectionSupervisor           │◄── wake (Signal)
//!                │  retry / availability / wifi restart    │
//!                └───────┬──────────────────────┬──────────┘
//!                        │ one attempt          │ radio on/off
//!                        ▼                      ▼
//!          ┌─────────────────────────┐  ┌────────────────────┐
//!          │  DeviceSessionHandler   │  │ PowerSaveController│
//!          │ refresh / breaker / ack │  └────────────────────┘
//!          └───────────┬─────────────┘            ▲
//!                      │ DeviceMessage            │ ensure radio on
//!                      ▼                          │
//!   ┌──────────────────────────────────┐  ┌───────┴──────────┐
//!   │ TopicTranslator + ClimateAggr.   │  │  CommandGateway  │◄── MQTT /set/...
//!   └───────────────┬──────────────────┘  └──────────────────┘
//!                   ▼
//!         Publisher (TopicCache dedup) ──► MessageBus
//! ```
//!
//! All components share one [`GatewayContext`]; configuration is an
//! immutable [`GatewayConfig`] snapshot swapped wholesale by the
//! [`ConfigReloader`].

pub mod climate;
pub mod command;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod power;
pub mod publish;
pub mod reload;
pub mod session;
pub mod settings;
pub mod signal;
pub mod supervisor;
pub mod translate;

pub use climate::ClimateAggregator;
pub use command::{Command, CommandGateway};
pub use config::{ConfigHandle, GatewayConfig};
pub use context::{ConnectionState, GatewayContext, PowerState};
pub use error::{BusError, CommandError, ConfigError, ReloadError, SessionError};
pub use power::PowerSaveController;
pub use publish::{Publisher, TopicCache};
pub use reload::ConfigReloader;
pub use session::{DeviceSessionHandler, EncodingErrorBreaker};
pub use settings::{Settings, SettingsSource};
pub use signal::Signal;
pub use supervisor::ConnectionSupervisor;

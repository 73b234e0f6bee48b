//! Decoded register values
//!
//! The device client decodes each inbound register payload into one of a
//! closed set of variants. The gateway never parses raw register bytes
//! itself, apart from mirroring them as hex.

use std::fmt;

use chrono::{DateTime, Utc};

/// Register identifiers the gateway writes to
pub mod registers {
    /// Request a full status refresh (payload `[0x03]`)
    pub const REFRESH: u8 = 0x06;
    /// Acknowledge a terminated pre-AC cycle
    pub const ACK_PRE_AC_TERMINATION: u8 = 0x05;
    /// AC on/off for MY14 vehicles
    pub const AC_ENABLED_MY14: u8 = 0x04;
    pub const HEADLIGHTS: u8 = 0x0a;
    pub const PARKING_LIGHTS: u8 = 0x0b;
    pub const CHARGE_TIMER: u8 = 0x17;
    /// AC mode + duration for MY14 vehicles (15 byte padded payload)
    pub const AC_MODE_MY14: u8 = 0x1b;
    /// AC state, mode and duration for MY18/MY24 vehicles
    pub const AC_MODE_MY18: u8 = 0x1c;

    pub const REFRESH_PAYLOAD: [u8; 1] = [0x03];
}

/// Vehicle model year, as detected by the device client during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelYear {
    My14,
    My18,
    My24,
    #[default]
    Unknown,
}

/// Climate mode reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateMode {
    Cool,
    Heat,
    Windscreen,
    Unknown,
}

impl ClimateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClimateMode::Cool => "cool",
            ClimateMode::Heat => "heat",
            ClimateMode::Windscreen => "windscreen",
            ClimateMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ClimateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-AC (remote climate) operating state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreAcState {
    On,
    Off,
    Terminated,
    /// Any raw value the device client could not classify
    Unknown(u8),
}

/// A decoded register payload
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    Vin { vin: String, registrations: u8 },
    EcuVersion(String),
    BatteryWarning(u8),
    AcOperStatus { operating: bool },
    WifiSsid(String),
    Time(DateTime<Utc>),
    /// Raw settings dump, already rendered as text by the device client
    Settings(String),
    AcMode(ClimateMode),
    PreAcState(PreAcState),
    ChargeStatus { charging: bool, remaining_minutes: u16 },
    DoorStatus(DoorStatus),
    BatteryLevel { level: u8, parking_lights: bool },
    LightStatus { interior: bool, hazard: bool },
    ChargePlug { connected: bool },
}

/// Door, bonnet, boot and headlight state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoorStatus {
    pub locked: bool,
    pub driver: bool,
    pub front_passenger: bool,
    pub rear_left: bool,
    pub rear_right: bool,
    pub bonnet: bool,
    pub boot: bool,
    pub headlights: bool,
}

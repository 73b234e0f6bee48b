//! Simulated vehicle for running the daemon without a car

use chrono::Utc;
use clap::ValueEnum;
use phev_core::mock::MockDevice;
use phev_core::register::DoorStatus;
use phev_core::{ClimateMode, DeviceMessage, ModelYear, PreAcState, RegisterValue};

const DEMO_VIN: &str = "JMAXJGF0WFZ000001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulatedModel {
    My14,
    My18,
    My24,
}

impl From<SimulatedModel> for ModelYear {
    fn from(model: SimulatedModel) -> Self {
        match model {
            SimulatedModel::My14 => ModelYear::My14,
            SimulatedModel::My18 => ModelYear::My18,
            SimulatedModel::My24 => ModelYear::My24,
        }
    }
}

fn report(register: u8, data: &[u8], value: RegisterValue) -> DeviceMessage {
    DeviceMessage::response(register, data.to_vec(), Some(value))
}

/// Register reports replayed on every simulated connection
fn demo_script() -> Vec<DeviceMessage> {
    vec![
        report(
            0x15,
            DEMO_VIN.as_bytes(),
            RegisterValue::Vin {
                vin: DEMO_VIN.to_string(),
                registrations: 1,
            },
        ),
        report(
            0xc0,
            b"PHEV-ECU-0501",
            RegisterValue::EcuVersion("PHEV-ECU-0501".to_string()),
        ),
        report(0x12, &[0x00], RegisterValue::Time(Utc::now())),
        report(
            0x1d,
            &[0x4b, 0x00],
            RegisterValue::BatteryLevel {
                level: 75,
                parking_lights: false,
            },
        ),
        report(
            0x1f,
            &[0x00, 0x5a, 0x00],
            RegisterValue::ChargeStatus {
                charging: false,
                remaining_minutes: 90,
            },
        ),
        report(0x1e, &[0x00], RegisterValue::ChargePlug { connected: false }),
        report(
            0x24,
            &[0x01; 10],
            RegisterValue::DoorStatus(DoorStatus {
                locked: true,
                ..Default::default()
            }),
        ),
        report(
            0x02,
            &[0x00, 0x00],
            RegisterValue::LightStatus {
                interior: false,
                hazard: false,
            },
        ),
        report(0x1c, &[0x01], RegisterValue::AcMode(ClimateMode::Cool)),
        report(0x1a, &[0x01], RegisterValue::PreAcState(PreAcState::Off)),
        report(
            0x26,
            &[0x00],
            RegisterValue::AcOperStatus { operating: false },
        ),
        report(
            0x2c,
            b"REMOTE12345",
            RegisterValue::WifiSsid("REMOTE12345".to_string()),
        ),
    ]
}

pub fn device(model: SimulatedModel) -> MockDevice {
    MockDevice::new(model.into()).with_script(demo_script())
}

//! Inbound MQTT commands
//!
//! Topics are parsed once into a [`Command`], then executed by the
//! [`CommandGateway`]. Register-writing commands first make sure a device
//! session exists, waking the supervisor and switching the radio on when
//! needed.

use std::sync::Arc;
use std::time::Duration;

use phev_core::{registers, ModelYear};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::GatewayContext;
use crate::error::CommandError;
use crate::power::PowerSaveController;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Light switch payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn parse(payload: &str) -> Option<Self> {
        match payload {
            "on" => Some(Switch::On),
            "off" => Some(Switch::Off),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            Switch::On => 0x01,
            Switch::Off => 0x02,
        }
    }
}

/// Requested AC mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcMode {
    Off,
    Cool,
    Heat,
    Windscreen,
}

impl AcMode {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "off" => Some(AcMode::Off),
            "cool" => Some(AcMode::Cool),
            "heat" => Some(AcMode::Heat),
            "windscreen" => Some(AcMode::Windscreen),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            AcMode::Off => 0x00,
            AcMode::Cool => 0x01,
            AcMode::Heat => 0x02,
            AcMode::Windscreen => 0x03,
        }
    }
}

/// How long the AC runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcDuration {
    Minutes10,
    Minutes20,
    Minutes30,
}

impl AcDuration {
    /// `on` and `off` carry the shortest duration
    fn parse(payload: &str) -> Option<Self> {
        match payload {
            "10" | "on" | "off" => Some(AcDuration::Minutes10),
            "20" => Some(AcDuration::Minutes20),
            "30" => Some(AcDuration::Minutes30),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            AcDuration::Minutes10 => 0x00,
            AcDuration::Minutes20 => 0x01,
            AcDuration::Minutes30 => 0x02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateRequest {
    pub mode: AcMode,
    pub duration: AcDuration,
}

/// `/connection` verbs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionControl {
    Restart,
    WifiEnable,
    WifiDisable,
    /// `on` / `off`, accepted and ignored
    Deprecated(String),
}

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RawRegister { register: u8, data: Vec<u8> },
    ParkingLights(Switch),
    Headlights(Switch),
    CancelChargeTimer,
    /// Acknowledge a terminated pre-AC cycle
    ClimateReset,
    Climate(ClimateRequest),
    Connection(ConnectionControl),
    DumpSettings,
    /// Our own `/settings` publish echoed back
    SettingsEcho,
}

impl Command {
    /// Parse an absolute topic and payload
    pub fn parse(prefix: &str, topic: &str, payload: &[u8]) -> Result<Command, CommandError> {
        let unknown = || CommandError::UnknownTopic(topic.to_string());
        let relative = topic.strip_prefix(prefix).ok_or_else(unknown)?;
        let raw_payload = String::from_utf8_lossy(payload);
        let value = raw_payload.trim().to_ascii_lowercase();
        let invalid = || CommandError::InvalidPayload {
            topic: topic.to_string(),
            payload: value.clone(),
        };

        if let Some(id) = relative.strip_prefix("/set/register/") {
            let register = match hex::decode(id) {
                Ok(bytes) if bytes.len() == 1 => bytes[0],
                _ => return Err(CommandError::MalformedHex(topic.to_string())),
            };
            let data = hex::decode(raw_payload.trim())
                .map_err(|_| CommandError::MalformedHex(raw_payload.to_string()))?;
            return Ok(Command::RawRegister { register, data });
        }

        if let Some(leaf) = relative.strip_prefix("/set/climate/") {
            return match leaf {
                "state" => match value.as_str() {
                    "reset" => Ok(Command::ClimateReset),
                    _ => Err(invalid()),
                },
                "mode" => {
                    let mode = AcMode::parse(&value).ok_or_else(invalid)?;
                    Ok(Command::Climate(ClimateRequest {
                        mode,
                        duration: AcDuration::Minutes10,
                    }))
                }
                "cool" | "heat" | "windscreen" => {
                    let duration = AcDuration::parse(&value).ok_or_else(invalid)?;
                    let mode = if value == "off" {
                        AcMode::Off
                    } else {
                        AcMode::parse(leaf).ok_or_else(unknown)?
                    };
                    Ok(Command::Climate(ClimateRequest { mode, duration }))
                }
                _ => Err(unknown()),
            };
        }

        match relative {
            "/set/parkinglights" => Switch::parse(&value)
                .map(Command::ParkingLights)
                .ok_or_else(invalid),
            "/set/headlights" => Switch::parse(&value)
                .map(Command::Headlights)
                .ok_or_else(invalid),
            "/set/cancelchargetimer" => Ok(Command::CancelChargeTimer),
            "/connection" => match value.as_str() {
                "restart" => Ok(Command::Connection(ConnectionControl::Restart)),
                "wifi_enable" => Ok(Command::Connection(ConnectionControl::WifiEnable)),
                "wifi_disable" => Ok(Command::Connection(ConnectionControl::WifiDisable)),
                "on" | "off" => Ok(Command::Connection(ConnectionControl::Deprecated(value.clone()))),
                _ => Err(invalid()),
            },
            "/settings/dump" => Ok(Command::DumpSettings),
            _ if relative.starts_with("/settings") => Ok(Command::SettingsEcho),
            _ => Err(unknown()),
        }
    }

    /// Register writes for this command, in order
    pub fn writes(&self, model_year: ModelYear) -> Result<Vec<(u8, Vec<u8>)>, CommandError> {
        let writes = match self {
            Command::RawRegister { register, data } => vec![(*register, data.clone())],
            Command::ParkingLights(switch) => {
                vec![(registers::PARKING_LIGHTS, vec![switch.code()])]
            }
            Command::Headlights(switch) => vec![(registers::HEADLIGHTS, vec![switch.code()])],
            Command::CancelChargeTimer => vec![
                (registers::CHARGE_TIMER, vec![0x01]),
                (registers::CHARGE_TIMER, vec![0x11]),
            ],
            Command::ClimateReset => vec![(registers::ACK_PRE_AC_TERMINATION, vec![0x01])],
            Command::Climate(request) => climate_writes(*request, model_year)?,
            Command::Connection(_) | Command::DumpSettings | Command::SettingsEcho => Vec::new(),
        };
        Ok(writes)
    }
}

fn climate_writes(
    request: ClimateRequest,
    model_year: ModelYear,
) -> Result<Vec<(u8, Vec<u8>)>, CommandError> {
    let mode = request.mode.code();
    let duration = request.duration.code();
    let on = request.mode != AcMode::Off;

    match model_year {
        ModelYear::My14 => {
            let mut payload = vec![0xff; 15];
            payload[0] = 0x00;
            payload[1] = 0x00;
            payload[6] = mode | duration;
            let enabled = if on { 0x02 } else { 0x01 };
            Ok(vec![
                (registers::AC_MODE_MY14, payload),
                (registers::AC_ENABLED_MY14, vec![enabled]),
            ])
        }
        ModelYear::My18 | ModelYear::My24 => {
            let state = if on { 0x02 } else { 0x01 };
            Ok(vec![(
                registers::AC_MODE_MY18,
                vec![state, mode, duration, 0x00],
            )])
        }
        ModelYear::Unknown => Err(CommandError::UnsupportedModelYear),
    }
}

/// Executes inbound commands against the active device session
#[derive(Clone)]
pub struct CommandGateway {
    ctx: Arc<GatewayContext>,
    power: PowerSaveController,
}

impl CommandGateway {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        let power = PowerSaveController::new(ctx.clone());
        Self { ctx, power }
    }

    /// Parse and execute one bus message. Errors are logged and dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        info!(topic, payload = %String::from_utf8_lossy(payload), "Command received");

        let prefix = self.ctx.config().mqtt.topic_prefix.clone();
        let command = match Command::parse(&prefix, topic, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring command");
                return;
            }
        };

        match self.execute(command).await {
            Ok(()) => {}
            Err(CommandError::NotReady) => {
                warn!(topic, "Command requested but vehicle connection not ready")
            }
            Err(e) => warn!(topic, error = %e, "Command failed"),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        match &command {
            Command::Connection(control) => {
                self.connection_control(control).await;
                return Ok(());
            }
            Command::DumpSettings => {
                if self.ctx.session().is_none() {
                    return Err(CommandError::NoSession);
                }
                match self.ctx.take_settings() {
                    Some(settings) => info!("Current vehicle settings:\n{}", settings),
                    None => info!("No vehicle settings received yet"),
                }
                return Ok(());
            }
            Command::SettingsEcho => {
                debug!("Ignoring echoed settings topic");
                return Ok(());
            }
            _ => {}
        }

        if !self.ensure_connected_for_command().await {
            return Err(CommandError::NotReady);
        }
        let handle = self.ctx.session().ok_or(CommandError::NoSession)?;

        for (register, data) in command.writes(handle.model_year())? {
            debug!(register = %format!("0x{:02x}", register), data = %hex::encode(&data), "Writing register");
            handle.set_register(register, &data).await?;
        }

        if command == Command::ClimateReset {
            let states = {
                let mut climate = self.ctx.climate();
                climate.reset_status();
                climate.states()
            };
            for (topic, payload) in states {
                self.ctx.publish(topic, payload).await;
            }
        }

        Ok(())
    }

    async fn connection_control(&self, control: &ConnectionControl) {
        match control {
            ConnectionControl::Restart => {
                info!("Restarting vehicle connection");
                self.ctx.set_enabled(true);
                self.ctx.publish_availability(false).await;
                if let Some(handle) = self.ctx.session() {
                    handle.close().await;
                }
                self.ctx.wake().notify();
            }
            ConnectionControl::WifiEnable => {
                info!("Manual WiFi enable, overrides power save temporarily");
                self.power.radio_enable().await;
            }
            ConnectionControl::WifiDisable => {
                info!("Manual WiFi disable, overrides power save temporarily");
                self.power.radio_disable().await;
            }
            ConnectionControl::Deprecated(verb) => {
                warn!(verb = %verb, "Ignoring deprecated connection command");
            }
        }
    }

    /// Make sure a device session is up before a register write.
    ///
    /// Records the command time, switches the radio on if needed, wakes
    /// the supervisor, then waits for the session, bounded by
    /// link wait + start timeout + 5s.
    pub async fn ensure_connected_for_command(&self) -> bool {
        self.power.ensure_radio_on().await;
        self.ctx.record_command();
        self.ctx.request_connect();

        let timeout = self.ctx.config().command_connect_timeout();
        let deadline = Instant::now() + timeout;
        debug!(timeout = ?timeout, "Waiting for vehicle connection");

        // Only one waiter consumes the ready signal; others notice the
        // connected flag on their next poll
        loop {
            if self.ctx.connection().connected {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let slice = remaining.min(READY_POLL_INTERVAL);
            if self.ctx.session_ready().wait_timeout(slice).await {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(topic: &str, payload: &str) -> Result<Command, CommandError> {
        Command::parse("phev", topic, payload.as_bytes())
    }

    #[test]
    fn test_parse_lights() {
        assert_eq!(
            parse("phev/set/parkinglights", "ON").unwrap(),
            Command::ParkingLights(Switch::On)
        );
        assert_eq!(
            parse("phev/set/headlights", "off").unwrap(),
            Command::Headlights(Switch::Off)
        );
        assert!(matches!(
            parse("phev/set/headlights", "blink"),
            Err(CommandError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_parse_raw_register() {
        assert_eq!(
            parse("phev/set/register/1c", "02010000").unwrap(),
            Command::RawRegister {
                register: 0x1c,
                data: vec![0x02, 0x01, 0x00, 0x00]
            }
        );
        assert!(matches!(
            parse("phev/set/register/zz", "00"),
            Err(CommandError::MalformedHex(_))
        ));
        assert!(matches!(
            parse("phev/set/register/0a", "0"),
            Err(CommandError::MalformedHex(_))
        ));
    }

    #[test]
    fn test_parse_connection_and_unknown() {
        assert_eq!(
            parse("phev/connection", "Restart").unwrap(),
            Command::Connection(ConnectionControl::Restart)
        );
        assert_eq!(
            parse("phev/connection", "off").unwrap(),
            Command::Connection(ConnectionControl::Deprecated("off".to_string()))
        );
        assert_eq!(parse("phev/settings/foo", "x").unwrap(), Command::SettingsEcho);
        assert!(matches!(
            parse("phev/set/unknown", "1"),
            Err(CommandError::UnknownTopic(_))
        ));
        assert!(matches!(
            parse("other/set/headlights", "on"),
            Err(CommandError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_climate_writes_my18() {
        let command = parse("phev/set/climate/heat", "20").unwrap();
        assert_eq!(
            command.writes(ModelYear::My18).unwrap(),
            vec![(0x1c, vec![0x02, 0x02, 0x01, 0x00])]
        );

        let command = parse("phev/set/climate/cool", "off").unwrap();
        assert_eq!(
            command.writes(ModelYear::My24).unwrap(),
            vec![(0x1c, vec![0x01, 0x00, 0x00, 0x00])]
        );
    }

    #[test]
    fn test_climate_writes_my14() {
        let command = parse("phev/set/climate/mode", "windscreen").unwrap();
        let writes = command.writes(ModelYear::My14).unwrap();

        let mut expected = vec![0xff; 15];
        expected[0] = 0x00;
        expected[1] = 0x00;
        expected[6] = 0x03;
        assert_eq!(writes, vec![(0x1b, expected), (0x04, vec![0x02])]);
    }

    #[test]
    fn test_climate_mode_rejects_unknown_payload() {
        assert!(matches!(
            parse("phev/set/climate/mode", "defrost"),
            Err(CommandError::InvalidPayload { .. })
        ));
        assert!(matches!(
            parse("phev/set/climate/heat", "45"),
            Err(CommandError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_climate_unknown_model_year() {
        let command = parse("phev/set/climate/cool", "on").unwrap();
        assert!(matches!(
            command.writes(ModelYear::Unknown),
            Err(CommandError::UnsupportedModelYear)
        ));
    }

    #[test]
    fn test_charge_timer_and_reset_writes() {
        assert_eq!(
            Command::CancelChargeTimer.writes(ModelYear::My18).unwrap(),
            vec![(0x17, vec![0x01]), (0x17, vec![0x11])]
        );
        assert_eq!(
            Command::ClimateReset.writes(ModelYear::My18).unwrap(),
            vec![(0x05, vec![0x01])]
        );
    }
}

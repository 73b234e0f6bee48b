//! Gateway configuration
//!
//! [`GatewayConfig::from_settings`] is the one validating constructor: it
//! applies defaults, parses durations and booleans, emits range advisories
//! and disables features whose prerequisites are missing. The result is an
//! immutable snapshot shared through a [`ConfigHandle`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use phev_core::DeviceSettings;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::settings::Settings;

pub const DEFAULT_MQTT_SERVER: &str = "tcp://127.0.0.1:1883";
pub const DEFAULT_WIFI_RESTART_COMMAND: &str =
    "sudo ip link set wlan0 down && sleep 3 && sudo ip link set wlan0 up";

/// Every setting the gateway reads
pub const KNOWN_KEYS: &[&str] = &[
    "mqtt_server",
    "mqtt_username",
    "mqtt_password",
    "mqtt_topic_prefix",
    "mqtt_disable_register_set_command",
    "ha_discovery",
    "ha_discovery_prefix",
    "vehicle_vin",
    "address",
    "update_interval",
    "local_wifi_restart_enabled",
    "wifi_restart_time",
    "wifi_restart_command",
    "remote_wifi_restart_enabled",
    "remote_wifi_restart_topic",
    "remote_wifi_restart_message",
    "remote_wifi_control_topic",
    "remote_wifi_enable_message",
    "remote_wifi_disable_message",
    "remote_wifi_power_save_enabled",
    "remote_wifi_power_save_wait",
    "remote_wifi_power_save_duration",
    "remote_wifi_command_wait",
    "connection_retry_interval",
    "availability_offline_timeout",
    "remote_wifi_restart_min_interval",
    "encoding_error_reset_interval",
    "config_reload_interval",
    "config_hot_reload",
    "phev_start_timeout",
    "phev_register_timeout",
    "phev_tcp_read_timeout",
    "phev_tcp_write_timeout",
    "log_level",
    "log_timestamps",
];

/// Broker connection and topic layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub server: String,
    pub username: String,
    pub password: String,
    pub topic_prefix: String,
    /// Skip the `/set/#` subscription
    pub disable_register_set: bool,
}

/// Home Assistant discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub prefix: String,
    /// Known VIN; enables discovery before the vehicle reports one
    pub vehicle_vin: Option<String>,
}

/// Local and remote WiFi restart when the vehicle stays unreachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiRestartConfig {
    /// Restart after this long without a connection; zero disables
    pub restart_time: Duration,
    pub local_enabled: bool,
    pub command: String,
    pub remote_enabled: bool,
    pub remote_topic: String,
    pub remote_message: String,
    pub remote_min_interval: Duration,
}

/// Remote radio control and power-save duty cycling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerSaveConfig {
    pub enabled: bool,
    pub control_topic: String,
    pub enable_message: String,
    pub disable_message: String,
    /// Time for the radio link to come up after enabling
    pub link_wait: Duration,
    /// Length of one duty-cycle session
    pub session_duration: Duration,
    /// Keep the radio on this long after the last command
    pub command_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Refresh period, also the power-save duty period
    pub update_interval: Duration,
    pub connection_retry_interval: Duration,
    pub availability_offline_timeout: Duration,
    pub encoding_error_reset_interval: Duration,
    pub config_reload_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Normalised level: off, error, warn, info, debug or trace
    pub level: String,
    pub timestamps: bool,
}

/// One validated snapshot of every tunable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
    pub device: DeviceSettings,
    pub timing: TimingConfig,
    pub wifi: WifiRestartConfig,
    pub power: PowerSaveConfig,
    pub hot_reload: bool,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                server: DEFAULT_MQTT_SERVER.to_string(),
                username: String::new(),
                password: String::new(),
                topic_prefix: "phev".to_string(),
                disable_register_set: false,
            },
            discovery: DiscoveryConfig {
                enabled: true,
                prefix: "homeassistant".to_string(),
                vehicle_vin: None,
            },
            device: DeviceSettings::default(),
            timing: TimingConfig {
                update_interval: Duration::from_secs(5 * 60),
                connection_retry_interval: Duration::from_secs(60),
                availability_offline_timeout: Duration::from_secs(30),
                encoding_error_reset_interval: Duration::from_secs(15),
                config_reload_interval: Duration::from_secs(5),
            },
            wifi: WifiRestartConfig {
                restart_time: Duration::ZERO,
                local_enabled: false,
                command: DEFAULT_WIFI_RESTART_COMMAND.to_string(),
                remote_enabled: false,
                remote_topic: String::new(),
                remote_message: "restart".to_string(),
                remote_min_interval: Duration::from_secs(2 * 60),
            },
            power: PowerSaveConfig {
                enabled: false,
                control_topic: String::new(),
                enable_message: r#"{"wifi": "enable"}"#.to_string(),
                disable_message: r#"{"wifi": "disable"}"#.to_string(),
                link_wait: Duration::from_secs(5),
                session_duration: Duration::from_secs(30),
                command_wait: Duration::from_secs(10),
            },
            hot_reload: true,
            logging: LoggingConfig {
                level: "info".to_string(),
                timestamps: false,
            },
        }
    }
}

/// Reads typed values out of [`Settings`], falling back to defaults
struct Reader<'a> {
    settings: &'a Settings,
}

impl Reader<'_> {
    fn string(&self, key: &str, default: &str) -> String {
        self.settings.get(key).unwrap_or(default).to_string()
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.settings.get(key) else {
            return default;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            other => {
                warn!(key, value = other, default, "Invalid boolean, using default");
                default
            }
        }
    }

    /// Duration where zero or garbage means "use the default"
    fn duration(&self, key: &str, default: Duration) -> Duration {
        match self.parse_duration(key) {
            Some(d) if d.is_zero() => {
                warn!(key, default = ?default, "Zero duration, using default");
                default
            }
            Some(d) => d,
            None => default,
        }
    }

    /// Duration where zero is meaningful
    fn duration_or_zero(&self, key: &str) -> Duration {
        self.parse_duration(key).unwrap_or(Duration::ZERO)
    }

    fn parse_duration(&self, key: &str) -> Option<Duration> {
        let raw = self.settings.get(key)?.trim();
        if raw.is_empty() || raw == "0" {
            return Some(Duration::ZERO);
        }
        match humantime::parse_duration(raw) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(key, value = raw, error = %e, "Invalid duration, using default");
                None
            }
        }
    }
}

fn normalize_log_level(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "info" => "info",
        "none" => "off",
        "panic" | "fatal" | "error" => "error",
        "warning" | "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        other => {
            warn!(level = other, "Unknown log level, using info");
            "info"
        }
    }
    .to_string()
}

impl GatewayConfig {
    /// Build and validate a snapshot.
    ///
    /// Fails only when a required value is missing; everything else is
    /// defaulted or disabled with a warning.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let d = GatewayConfig::default();
        let r = Reader { settings };

        let server = r.string("mqtt_server", &d.mqtt.server);
        if server.trim().is_empty() {
            return Err(ConfigError::MissingRequired("mqtt_server"));
        }

        let vehicle_vin = r.string("vehicle_vin", "");

        let mut config = GatewayConfig {
            mqtt: MqttConfig {
                server,
                username: r.string("mqtt_username", ""),
                password: r.string("mqtt_password", ""),
                topic_prefix: r.string("mqtt_topic_prefix", &d.mqtt.topic_prefix),
                disable_register_set: r.bool("mqtt_disable_register_set_command", false),
            },
            discovery: DiscoveryConfig {
                enabled: r.bool("ha_discovery", d.discovery.enabled),
                prefix: r.string("ha_discovery_prefix", &d.discovery.prefix),
                vehicle_vin: (!vehicle_vin.trim().is_empty())
                    .then(|| vehicle_vin.trim().to_string()),
            },
            device: DeviceSettings {
                address: r.string("address", &d.device.address),
                start_timeout: r.duration("phev_start_timeout", d.device.start_timeout),
                register_timeout: r.duration("phev_register_timeout", d.device.register_timeout),
                tcp_read_timeout: r.duration("phev_tcp_read_timeout", d.device.tcp_read_timeout),
                tcp_write_timeout: r
                    .duration("phev_tcp_write_timeout", d.device.tcp_write_timeout),
            },
            timing: TimingConfig {
                update_interval: r.duration("update_interval", d.timing.update_interval),
                connection_retry_interval: r.duration(
                    "connection_retry_interval",
                    d.timing.connection_retry_interval,
                ),
                availability_offline_timeout: r.duration(
                    "availability_offline_timeout",
                    d.timing.availability_offline_timeout,
                ),
                encoding_error_reset_interval: r.duration(
                    "encoding_error_reset_interval",
                    d.timing.encoding_error_reset_interval,
                ),
                config_reload_interval: r
                    .duration("config_reload_interval", d.timing.config_reload_interval),
            },
            wifi: WifiRestartConfig {
                restart_time: r.duration_or_zero("wifi_restart_time"),
                local_enabled: r.bool("local_wifi_restart_enabled", false),
                command: r.string("wifi_restart_command", &d.wifi.command),
                remote_enabled: r.bool("remote_wifi_restart_enabled", false),
                remote_topic: r.string("remote_wifi_restart_topic", ""),
                remote_message: r.string("remote_wifi_restart_message", &d.wifi.remote_message),
                remote_min_interval: r.duration(
                    "remote_wifi_restart_min_interval",
                    d.wifi.remote_min_interval,
                ),
            },
            power: PowerSaveConfig {
                enabled: r.bool("remote_wifi_power_save_enabled", false),
                control_topic: r.string("remote_wifi_control_topic", ""),
                enable_message: r.string("remote_wifi_enable_message", &d.power.enable_message),
                disable_message: r
                    .string("remote_wifi_disable_message", &d.power.disable_message),
                link_wait: r.duration("remote_wifi_power_save_wait", d.power.link_wait),
                session_duration: r
                    .duration("remote_wifi_power_save_duration", d.power.session_duration),
                command_wait: r.duration("remote_wifi_command_wait", d.power.command_wait),
            },
            hot_reload: r.bool("config_hot_reload", true),
            logging: LoggingConfig {
                level: normalize_log_level(&r.string("log_level", "info")),
                timestamps: r.bool("log_timestamps", false),
            },
        };

        // Empty messages fall back to the defaults
        if config.wifi.remote_message.is_empty() {
            config.wifi.remote_message = d.wifi.remote_message;
        }
        if config.power.enable_message.is_empty() {
            config.power.enable_message = d.power.enable_message;
        }
        if config.power.disable_message.is_empty() {
            config.power.disable_message = d.power.disable_message;
        }

        config.validate();
        Ok(config)
    }

    /// Range advisories and consistency fixes
    fn validate(&mut self) {
        let advise_min = |key: &str, value: Duration, min: Duration| {
            if value < min {
                warn!(key, value = ?value, minimum = ?min, "Setting is very short");
            }
        };
        let advise_max = |key: &str, value: Duration, max: Duration| {
            if value > max {
                warn!(key, value = ?value, maximum = ?max, "Setting is very long");
            }
        };
        let secs = Duration::from_secs;

        advise_min("update_interval", self.timing.update_interval, secs(30));
        advise_max("remote_wifi_power_save_wait", self.power.link_wait, secs(60));
        advise_max("remote_wifi_command_wait", self.power.command_wait, secs(60));
        advise_min(
            "connection_retry_interval",
            self.timing.connection_retry_interval,
            secs(10),
        );
        advise_max(
            "connection_retry_interval",
            self.timing.connection_retry_interval,
            secs(5 * 60),
        );
        advise_min(
            "availability_offline_timeout",
            self.timing.availability_offline_timeout,
            secs(10),
        );
        advise_max(
            "availability_offline_timeout",
            self.timing.availability_offline_timeout,
            secs(2 * 60),
        );
        advise_min(
            "remote_wifi_restart_min_interval",
            self.wifi.remote_min_interval,
            secs(30),
        );
        advise_min(
            "encoding_error_reset_interval",
            self.timing.encoding_error_reset_interval,
            secs(5),
        );
        advise_min("config_reload_interval", self.timing.config_reload_interval, secs(1));
        advise_max("config_reload_interval", self.timing.config_reload_interval, secs(30));
        advise_min("phev_start_timeout", self.device.start_timeout, secs(5));
        advise_min("phev_register_timeout", self.device.register_timeout, secs(3));
        advise_min("phev_tcp_read_timeout", self.device.tcp_read_timeout, secs(5));
        advise_min("phev_tcp_write_timeout", self.device.tcp_write_timeout, secs(5));

        if self.wifi.local_enabled && self.wifi.command.trim().is_empty() {
            warn!("local_wifi_restart_enabled is set without wifi_restart_command, disabling local restart");
            self.wifi.local_enabled = false;
        }
        if self.wifi.remote_enabled && self.wifi.remote_topic.is_empty() {
            warn!("remote_wifi_restart_enabled is set without remote_wifi_restart_topic, disabling remote restart");
            self.wifi.remote_enabled = false;
        }
        if self.power.enabled && self.power.control_topic.is_empty() {
            warn!("remote_wifi_power_save_enabled is set without remote_wifi_control_topic, disabling power save");
            self.power.enabled = false;
        }
        if self.power.enabled && self.timing.update_interval <= Duration::from_secs(60) {
            warn!(
                update_interval = ?self.timing.update_interval,
                "Power save needs update_interval above one minute, duty cycling stays off"
            );
        }
        if self.discovery.enabled && self.discovery.vehicle_vin.is_none() {
            info!("vehicle_vin not configured, discovery waits for the VIN from the vehicle");
        }
    }

    /// Duty cycling runs only with a control topic and a duty period above
    /// one minute
    pub fn power_save_active(&self) -> bool {
        self.power.enabled
            && !self.power.control_topic.is_empty()
            && self.timing.update_interval > Duration::from_secs(60)
    }

    /// Upper bound a command waits for the device session
    pub fn command_connect_timeout(&self) -> Duration {
        self.power.link_wait + self.device.start_timeout + Duration::from_secs(5)
    }

    /// Prefix a gateway-relative topic
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.mqtt.topic_prefix, suffix)
    }
}

/// Shared, swappable config snapshot
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<GatewayConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot; cheap to clone and safe to hold across awaits
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner.read().clone()
    }

    /// Swap in a new snapshot and run `on_swap` while the write lock is
    /// held. `on_swap` must not call back into this handle.
    pub fn replace_with<F>(&self, config: GatewayConfig, on_swap: F)
    where
        F: FnOnce(&GatewayConfig, &GatewayConfig),
    {
        let mut guard = self.inner.write();
        let previous = std::mem::replace(&mut *guard, Arc::new(config));
        on_swap(&previous, &guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_settings(&Settings::default()).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.timing.update_interval, Duration::from_secs(300));
        assert_eq!(config.device.address, "192.168.8.46:8080");
        assert!(!config.power_save_active());
    }

    #[test]
    fn test_empty_mqtt_server_rejected() {
        let result = GatewayConfig::from_settings(&settings(&[("mqtt_server", "")]));
        assert!(matches!(result, Err(ConfigError::MissingRequired("mqtt_server"))));
    }

    #[test]
    fn test_invalid_and_zero_durations_fall_back() {
        let config = GatewayConfig::from_settings(&settings(&[
            ("update_interval", "soon"),
            ("connection_retry_interval", "0"),
            ("remote_wifi_power_save_wait", "7s"),
            ("wifi_restart_time", "10m"),
        ]))
        .unwrap();
        assert_eq!(config.timing.update_interval, Duration::from_secs(300));
        assert_eq!(config.timing.connection_retry_interval, Duration::from_secs(60));
        assert_eq!(config.power.link_wait, Duration::from_secs(7));
        assert_eq!(config.wifi.restart_time, Duration::from_secs(600));
    }

    #[test]
    fn test_power_save_requires_topic_and_long_interval() {
        let config = GatewayConfig::from_settings(&settings(&[
            ("remote_wifi_power_save_enabled", "true"),
        ]))
        .unwrap();
        assert!(!config.power.enabled);

        let config = GatewayConfig::from_settings(&settings(&[
            ("remote_wifi_power_save_enabled", "true"),
            ("remote_wifi_control_topic", "router/wifi"),
            ("update_interval", "1m"),
        ]))
        .unwrap();
        assert!(config.power.enabled);
        assert!(!config.power_save_active());

        let config = GatewayConfig::from_settings(&settings(&[
            ("remote_wifi_power_save_enabled", "true"),
            ("remote_wifi_control_topic", "router/wifi"),
            ("update_interval", "10m"),
        ]))
        .unwrap();
        assert!(config.power_save_active());
    }

    #[test]
    fn test_restart_without_prerequisites_disabled() {
        let config = GatewayConfig::from_settings(&settings(&[
            ("local_wifi_restart_enabled", "true"),
            ("wifi_restart_command", ""),
            ("remote_wifi_restart_enabled", "true"),
        ]))
        .unwrap();
        assert!(!config.wifi.local_enabled);
        assert!(!config.wifi.remote_enabled);
    }

    #[test]
    fn test_command_connect_timeout() {
        let config = GatewayConfig::default();
        assert_eq!(config.command_connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_log_level_normalised() {
        let config =
            GatewayConfig::from_settings(&settings(&[("log_level", "WARNING")])).unwrap();
        assert_eq!(config.logging.level, "warn");
        let config = GatewayConfig::from_settings(&settings(&[("log_level", "none")])).unwrap();
        assert_eq!(config.logging.level, "off");
    }

    #[test]
    fn test_replace_with_runs_callback_under_lock() {
        let handle = ConfigHandle::new(GatewayConfig::default());
        let mut next = GatewayConfig::default();
        next.mqtt.topic_prefix = "car".to_string();

        let mut seen = None;
        handle.replace_with(next, |old, new| {
            seen = Some((old.mqtt.topic_prefix.clone(), new.mqtt.topic_prefix.clone()));
        });

        assert_eq!(seen, Some(("phev".to_string(), "car".to_string())));
        assert_eq!(handle.current().topic("/vin"), "car/vin");
    }
}

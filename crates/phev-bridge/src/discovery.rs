//! Home Assistant MQTT discovery
//!
//! Publishes one retained config document per entity under
//! `<discovery prefix>/<component>/<vin>_<object>/config`. Documents use
//! `~` as the abbreviation for the gateway topic prefix.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::context::GatewayContext;

const ENTITY_NAME: &str = "Phev";

#[derive(Debug, Serialize)]
struct DeviceInfo {
    name: String,
    identifiers: Vec<String>,
    manufacturer: &'static str,
    model: &'static str,
}

impl DeviceInfo {
    fn for_vin(vin: &str) -> Self {
        Self {
            name: format!("PHEV {}", vin),
            identifiers: vec![format!("phev-{}", vin)],
            manufacturer: "Mitsubishi",
            model: "Outlander PHEV",
        }
    }
}

/// A discovery document ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryDocument {
    pub topic: String,
    pub payload: Value,
}

struct Entity {
    component: &'static str,
    object: &'static str,
    unique_suffix: &'static str,
    fields: Value,
}

fn entity(component: &'static str, object: &'static str, fields: Value) -> Entity {
    Entity {
        component,
        object,
        unique_suffix: object,
        fields,
    }
}

fn entities(restart_button: bool) -> Vec<Entity> {
    let door = |object, label: &str, topic: &str| {
        entity(
            "binary_sensor",
            object,
            json!({
                "device_class": "door",
                "name": label,
                "state_topic": topic,
                "payload_off": "closed",
                "payload_on": "open",
            }),
        )
    };
    let climate_switch = |object, label: &str, icon: &str, leaf: &str| {
        entity(
            "switch",
            object,
            json!({
                "name": label,
                "icon": icon,
                "state_topic": format!("~/climate/{}", leaf),
                "command_topic": format!("~/set/climate/{}", leaf),
                "payload_off": "off",
                "payload_on": "on",
            }),
        )
    };
    let diagnostic = |object, label: &str, topic: &str, icon: &str| {
        entity(
            "sensor",
            object,
            json!({
                "name": label,
                "state_topic": topic,
                "icon": icon,
                "entity_category": "diagnostic",
            }),
        )
    };

    let mut list = vec![
        entity(
            "binary_sensor",
            "door_locked",
            json!({
                "device_class": "lock",
                "name": "Locked",
                "state_topic": "~/door/locked",
                "payload_off": "closed",
                "payload_on": "open",
            }),
        ),
        door("door_bonnet", "Bonnet", "~/door/bonnet"),
        door("door_boot", "Boot", "~/door/boot"),
        door("door_front_passenger", "Front Passenger Door", "~/door/front_passenger"),
        door("door_driver", "Driver Door", "~/door/driver"),
        door("door_rear_left", "Rear Left Door", "~/door/rear_left"),
        door("door_rear_right", "Rear Right Door", "~/door/rear_right"),
        entity(
            "sensor",
            "battery_level",
            json!({
                "device_class": "battery",
                "name": "Battery",
                "state_topic": "~/battery/level",
                "state_class": "measurement",
                "unit_of_measurement": "%",
            }),
        ),
        entity(
            "sensor",
            "battery_warning",
            json!({
                "name": "Battery Warning",
                "state_topic": "~/battery/warning",
                "icon": "mdi:battery-alert",
                "entity_category": "diagnostic",
            }),
        ),
        entity(
            "sensor",
            "battery_charge_remaining",
            json!({
                "name": "Charge Remaining",
                "state_topic": "~/charge/remaining",
                "unit_of_measurement": "min",
            }),
        ),
        entity(
            "binary_sensor",
            "charger_connected",
            json!({
                "device_class": "plug",
                "name": "Charger Connected",
                "state_topic": "~/charge/plug",
                "payload_on": "connected",
                "payload_off": "unplugged",
            }),
        ),
        entity(
            "binary_sensor",
            "battery_charging",
            json!({
                "device_class": "battery_charging",
                "name": "Charging",
                "state_topic": "~/charge/charging",
                "payload_on": "on",
                "payload_off": "off",
            }),
        ),
        entity(
            "switch",
            "cancel_charge_timer",
            json!({
                "name": "Disable Charge Timer",
                "icon": "mdi:timer-off",
                "state_topic": "~/charge/charging",
                "command_topic": "~/set/cancelchargetimer",
            }),
        ),
        entity(
            "binary_sensor",
            "climate_operating",
            json!({
                "device_class": "running",
                "name": "AC Operating",
                "icon": "mdi:air-conditioner",
                "state_topic": "~/climate/operating",
                "payload_off": "off",
                "payload_on": "on",
            }),
        ),
        climate_switch("climate_heat", "Heat", "mdi:weather-sunny", "heat"),
        climate_switch("climate_cool", "cool", "mdi:air-conditioner", "cool"),
        climate_switch(
            "climate_windscreen",
            "windscreen",
            "mdi:car-defrost-front",
            "windscreen",
        ),
        entity(
            "select",
            "climate_on",
            json!({
                "name": "climate state",
                "icon": "mdi:car-seat-heater",
                "state_topic": "~/climate/state",
                "command_topic": "~/set/climate/mode",
                "options": ["off", "heat", "cool", "windscreen"],
            }),
        ),
        entity(
            "light",
            "parkinglights",
            json!({
                "name": "Park Lights",
                "icon": "mdi:car-parking-lights",
                "state_topic": "~/lights/parking",
                "command_topic": "~/set/parkinglights",
                "payload_off": "off",
                "payload_on": "on",
            }),
        ),
        entity(
            "light",
            "headlights",
            json!({
                "name": "Head Lights",
                "icon": "mdi:car-light-dimmed",
                "state_topic": "~/lights/head",
                "command_topic": "~/set/headlights",
                "payload_off": "off",
                "payload_on": "on",
            }),
        ),
        entity(
            "binary_sensor",
            "interiorlights",
            json!({
                "device_class": "light",
                "name": "Interior Lights",
                "icon": "mdi:lightbulb",
                "state_topic": "~/lights/interior",
                "payload_off": "off",
                "payload_on": "on",
            }),
        ),
        entity(
            "binary_sensor",
            "hazardlights",
            json!({
                "device_class": "light",
                "name": "Hazard Lights",
                "icon": "mdi:hazard-lights",
                "state_topic": "~/lights/hazard",
                "payload_off": "off",
                "payload_on": "on",
            }),
        ),
        entity(
            "sensor",
            "vehicle_time",
            json!({
                "name": "Vehicle Time",
                "state_topic": "~/time",
                "icon": "mdi:clock-outline",
                "device_class": "timestamp",
                "entity_category": "diagnostic",
            }),
        ),
        diagnostic("wifi_ssid", "WiFi SSID", "~/wifi/ssid", "mdi:wifi"),
        diagnostic("settings", "Settings", "~/settings", "mdi:cog"),
        diagnostic("registrations", "Registrations", "~/registrations", "mdi:counter"),
        diagnostic("ecu_version", "ECU Version", "~/ecuversion", "mdi:chip"),
    ];

    if restart_button {
        list.push(Entity {
            component: "button",
            object: "reconnect_wifi",
            unique_suffix: "restart_wifi",
            fields: json!({
                "name": "Restart Wifi Connection",
                "icon": "mdi:timer-off",
                "command_topic": "~/connection",
                "payload_press": "restart",
            }),
        });
    }

    list
}

/// Build every discovery document for `vin`
pub fn documents(config: &GatewayConfig, vin: &str) -> Vec<DiscoveryDocument> {
    let restart_button = config.wifi.local_enabled || config.wifi.remote_enabled;
    let device = serde_json::to_value(DeviceInfo::for_vin(vin)).unwrap_or(Value::Null);

    entities(restart_button)
        .into_iter()
        .map(|e| {
            let mut payload = e.fields;
            if let Value::Object(map) = &mut payload {
                if let Some(Value::String(name)) = map.get_mut("name") {
                    *name = format!("{} {}", ENTITY_NAME, name);
                }
                map.insert(
                    "unique_id".to_string(),
                    Value::String(format!("{}_{}", vin, e.unique_suffix)),
                );
                map.insert("device".to_string(), device.clone());
                map.insert(
                    "~".to_string(),
                    Value::String(config.mqtt.topic_prefix.clone()),
                );
            }
            DiscoveryDocument {
                topic: format!(
                    "{}/{}/{}_{}/config",
                    config.discovery.prefix, e.component, vin, e.object
                ),
                payload,
            }
        })
        .collect()
}

/// Publish discovery for `vin` unless already done.
///
/// Documents go out once per distinct VIN. When a VIN is configured, a
/// different VIN reported later only logs a warning.
pub async fn publish_discovery(ctx: &GatewayContext, vin: &str) {
    let config = ctx.config();
    if !config.discovery.enabled {
        debug!("Discovery disabled, skipping");
        return;
    }

    if let Some(previous) = ctx.discovered_vin() {
        if previous == vin {
            debug!(vin, "Discovery already published");
            return;
        }
        if let Some(configured) = &config.discovery.vehicle_vin {
            warn!(
                vin,
                configured = %configured,
                "Vehicle VIN differs from configured VIN, not republishing discovery"
            );
            return;
        }
    }
    ctx.swap_discovered_vin(vin);

    let docs = documents(&config, vin);
    info!(vin, entities = docs.len(), prefix = %config.discovery.prefix, "Publishing discovery");

    let mut failed = 0;
    for doc in &docs {
        if let Err(e) = ctx
            .publish_raw(&doc.topic, &doc.payload.to_string(), true)
            .await
        {
            error!(topic = %doc.topic, error = %e, "Discovery publish failed");
            failed += 1;
        }
    }
    info!(published = docs.len() - failed, failed, "Discovery complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_layout() {
        let docs = documents(&GatewayConfig::default(), "JMAXJ123");
        let locked = docs
            .iter()
            .find(|d| d.topic == "homeassistant/binary_sensor/JMAXJ123_door_locked/config")
            .unwrap();

        assert_eq!(locked.payload["name"], "Phev Locked");
        assert_eq!(locked.payload["unique_id"], "JMAXJ123_door_locked");
        assert_eq!(locked.payload["~"], "phev");
        assert_eq!(locked.payload["device"]["identifiers"][0], "phev-JMAXJ123");
        assert_eq!(locked.payload["device"]["name"], "PHEV JMAXJ123");
    }

    #[test]
    fn test_charge_timer_reads_charging_state() {
        let docs = documents(&GatewayConfig::default(), "V");
        let timer = docs
            .iter()
            .find(|d| d.topic.ends_with("V_cancel_charge_timer/config"))
            .unwrap();
        assert_eq!(timer.payload["state_topic"], "~/charge/charging");
    }

    #[test]
    fn test_restart_button_only_when_restart_enabled() {
        let mut config = GatewayConfig::default();
        let has_button =
            |config: &GatewayConfig| documents(config, "V").iter().any(|d| d.topic.contains("/button/"));
        assert!(!has_button(&config));

        config.wifi.remote_enabled = true;
        config.wifi.remote_topic = "router/cmd".to_string();
        assert!(has_button(&config));
    }
}

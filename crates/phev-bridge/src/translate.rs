//! Register values to topic state

use chrono::SecondsFormat;
use phev_core::{DeviceMessage, RegisterValue};
use tracing::debug;

use crate::climate::ClimateAggregator;
use crate::context::GatewayContext;
use crate::discovery;
use crate::publish::TopicCache;

pub const BATTERY_LEVEL_TOPIC: &str = "/battery/level";
pub const CHARGE_REMAINING_TOPIC: &str = "/charge/remaining";

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn open_closed(value: bool) -> &'static str {
    if value {
        "open"
    } else {
        "closed"
    }
}

/// Topic/payload pairs for one decoded register value.
///
/// Out-of-range battery and charge readings are replaced by the cached
/// value (or dropped when nothing is cached). Climate variants update
/// `climate` and yield the full derived view.
pub fn topic_updates(
    value: &RegisterValue,
    cache: &TopicCache,
    climate: &mut ClimateAggregator,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut push = |topic: &str, payload: String| out.push((topic.to_string(), payload));

    match value {
        RegisterValue::Vin { vin, registrations } => {
            push("/vin", vin.clone());
            push("/registrations", registrations.to_string());
        }
        RegisterValue::EcuVersion(version) => push("/ecuversion", version.clone()),
        RegisterValue::BatteryWarning(warning) => push("/battery/warning", warning.to_string()),
        RegisterValue::AcOperStatus { operating } => {
            push("/climate/operating", on_off(*operating).to_string())
        }
        RegisterValue::WifiSsid(ssid) => push("/wifi/ssid", ssid.clone()),
        RegisterValue::Time(time) => {
            push("/time", time.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        RegisterValue::Settings(raw) => push("/settings", raw.clone()),
        RegisterValue::AcMode(mode) => {
            climate.set_mode(*mode);
            for (topic, payload) in climate.states() {
                push(topic, payload.to_string());
            }
        }
        RegisterValue::PreAcState(status) => {
            climate.set_status(*status);
            for (topic, payload) in climate.states() {
                push(topic, payload.to_string());
            }
        }
        RegisterValue::ChargeStatus {
            charging,
            remaining_minutes,
        } => {
            push("/charge/charging", on_off(*charging).to_string());
            if *remaining_minutes < 1000 {
                push(CHARGE_REMAINING_TOPIC, remaining_minutes.to_string());
            } else {
                debug!(remaining = remaining_minutes, "Ignoring charge remaining reading");
                if let Some(cached) = cache.get(CHARGE_REMAINING_TOPIC) {
                    push(CHARGE_REMAINING_TOPIC, cached);
                }
            }
        }
        RegisterValue::DoorStatus(doors) => {
            push("/door/locked", open_closed(!doors.locked).to_string());
            push("/door/rear_left", open_closed(doors.rear_left).to_string());
            push("/door/rear_right", open_closed(doors.rear_right).to_string());
            push("/door/front_right", open_closed(doors.driver).to_string());
            push("/door/driver", open_closed(doors.driver).to_string());
            push("/door/front_left", open_closed(doors.front_passenger).to_string());
            push("/door/front_passenger", open_closed(doors.front_passenger).to_string());
            push("/door/bonnet", open_closed(doors.bonnet).to_string());
            push("/door/boot", open_closed(doors.boot).to_string());
            push("/lights/head", on_off(doors.headlights).to_string());
        }
        RegisterValue::BatteryLevel {
            level,
            parking_lights,
        } => {
            if *level > 5 && *level < 255 {
                push(BATTERY_LEVEL_TOPIC, level.to_string());
            } else if let Some(cached) = cache.get(BATTERY_LEVEL_TOPIC) {
                debug!(level, cached = %cached, "Ignoring battery level reading");
                push(BATTERY_LEVEL_TOPIC, cached);
            }
            push("/lights/parking", on_off(*parking_lights).to_string());
        }
        RegisterValue::LightStatus { interior, hazard } => {
            push("/lights/interior", on_off(*interior).to_string());
            push("/lights/hazard", on_off(*hazard).to_string());
        }
        RegisterValue::ChargePlug { connected } => {
            let payload = if *connected { "connected" } else { "unplugged" };
            push("/charge/plug", payload.to_string());
        }
    }

    out
}

/// Publish one register report: the raw hex mirror, then the decoded
/// topics. A VIN report also triggers discovery.
pub async fn publish_register(ctx: &GatewayContext, message: &DeviceMessage) {
    let raw_topic = format!("/register/{:02x}", message.register);
    ctx.publish(&raw_topic, &hex::encode(&message.data)).await;

    let Some(value) = &message.value else {
        return;
    };

    let updates = {
        let mut climate = ctx.climate();
        topic_updates(value, ctx.topics(), &mut climate)
    };
    for (topic, payload) in &updates {
        ctx.publish(topic, payload).await;
    }

    match value {
        RegisterValue::Vin { vin, .. } => discovery::publish_discovery(ctx, vin).await,
        RegisterValue::Settings(raw) => ctx.remember_settings(raw),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phev_core::register::DoorStatus;
    use phev_core::{ClimateMode, PreAcState};
    use pretty_assertions::assert_eq;

    fn updates(value: RegisterValue) -> Vec<(String, String)> {
        topic_updates(&value, &TopicCache::new(), &mut ClimateAggregator::new())
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(t, p)| (t.to_string(), p.to_string()))
            .collect()
    }

    #[test]
    fn test_door_status() {
        let doors = DoorStatus {
            locked: true,
            driver: true,
            headlights: true,
            ..Default::default()
        };
        assert_eq!(
            updates(RegisterValue::DoorStatus(doors)),
            pairs(&[
                ("/door/locked", "closed"),
                ("/door/rear_left", "closed"),
                ("/door/rear_right", "closed"),
                ("/door/front_right", "open"),
                ("/door/driver", "open"),
                ("/door/front_left", "closed"),
                ("/door/front_passenger", "closed"),
                ("/door/bonnet", "closed"),
                ("/door/boot", "closed"),
                ("/lights/head", "on"),
            ])
        );
    }

    #[test]
    fn test_battery_level_bounds() {
        let level = |level| RegisterValue::BatteryLevel {
            level,
            parking_lights: false,
        };

        assert_eq!(updates(level(3)), pairs(&[("/lights/parking", "off")]));
        assert_eq!(updates(level(255)), pairs(&[("/lights/parking", "off")]));
        assert_eq!(
            updates(level(50)),
            pairs(&[("/battery/level", "50"), ("/lights/parking", "off")])
        );
    }

    #[test]
    fn test_charge_remaining_out_of_range_ignored() {
        let value = RegisterValue::ChargeStatus {
            charging: true,
            remaining_minutes: 1000,
        };
        assert_eq!(updates(value), pairs(&[("/charge/charging", "on")]));
    }

    #[test]
    fn test_battery_level_out_of_range_republishes_cached() {
        let cache = TopicCache::new();
        cache.insert(BATTERY_LEVEL_TOPIC, "50");
        let mut climate = ClimateAggregator::new();

        for reading in [3, 255] {
            let value = RegisterValue::BatteryLevel {
                level: reading,
                parking_lights: true,
            };
            assert_eq!(
                topic_updates(&value, &cache, &mut climate),
                pairs(&[("/battery/level", "50"), ("/lights/parking", "on")])
            );
        }
    }

    #[test]
    fn test_charge_remaining_out_of_range_republishes_cached() {
        let cache = TopicCache::new();
        cache.insert(CHARGE_REMAINING_TOPIC, "90");
        let value = RegisterValue::ChargeStatus {
            charging: false,
            remaining_minutes: 1000,
        };
        assert_eq!(
            topic_updates(&value, &cache, &mut ClimateAggregator::new()),
            pairs(&[("/charge/charging", "off"), ("/charge/remaining", "90")])
        );
    }

    #[test]
    fn test_climate_merges_mode_and_status() {
        let cache = TopicCache::new();
        let mut climate = ClimateAggregator::new();

        topic_updates(&RegisterValue::AcMode(ClimateMode::Cool), &cache, &mut climate);
        let out = topic_updates(
            &RegisterValue::PreAcState(PreAcState::On),
            &cache,
            &mut climate,
        );
        assert_eq!(
            out,
            pairs(&[
                ("/climate/state", "cool"),
                ("/climate/cool", "on"),
                ("/climate/heat", "off"),
                ("/climate/windscreen", "off"),
            ])
        );
    }

    #[test]
    fn test_time_is_rfc3339() {
        use chrono::TimeZone;
        let time = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            updates(RegisterValue::Time(time)),
            pairs(&[("/time", "2024-03-01T12:30:00Z")])
        );
    }
}

//! rumqttc adapter
//!
//! The engine publishes through [`MqttBus`]; inbound command topics are read
//! from the event loop and handed to the [`CommandGateway`], one task per
//! message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use phev_bridge::context::AVAILABLE_TOPIC;
use phev_bridge::{CommandGateway, GatewayConfig, GatewayContext};
use phev_core::{BusError, MessageBus, QoS};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet};
use tracing::{debug, error, info, warn};

const CLIENT_ID: &str = "phev2mqtt";
const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 20;

fn qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Publish side of the broker connection
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(
        &self,
        topic: &str,
        level: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), BusError> {
        self.client
            .publish(topic, qos(level), retain, payload.as_bytes().to_vec())
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Split a broker URL into host and port.
///
/// Accepts `tcp://host:port`, `mqtt://host:port` and bare `host[:port]`.
pub fn parse_broker(url: &str) -> Result<(String, u16)> {
    let rest = url
        .trim()
        .strip_prefix("tcp://")
        .or_else(|| url.trim().strip_prefix("mqtt://"))
        .unwrap_or(url.trim());
    let rest = rest.trim_end_matches('/');

    if rest.contains("://") {
        bail!("Unsupported broker scheme in {}", url);
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid broker port in {}", url))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        bail!("Missing broker host in {}", url);
    }
    Ok((host.to_string(), port))
}

/// Create the client with credentials and the retained `offline` last will
pub fn connect(config: &GatewayConfig) -> Result<(MqttBus, AsyncClient, EventLoop)> {
    let (host, port) = parse_broker(&config.mqtt.server)?;

    let mut options = MqttOptions::new(CLIENT_ID, &host, port);
    options.set_keep_alive(KEEP_ALIVE);
    if !config.mqtt.username.is_empty() {
        options.set_credentials(&config.mqtt.username, &config.mqtt.password);
    }
    options.set_last_will(LastWill::new(
        config.topic(AVAILABLE_TOPIC),
        b"offline".to_vec(),
        rumqttc::QoS::AtMostOnce,
        true,
    ));

    info!(host = %host, port, "Connecting to MQTT broker");
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    Ok((
        MqttBus {
            client: client.clone(),
        },
        client,
        eventloop,
    ))
}

/// Topic filters the gateway listens on
pub fn subscriptions(config: &GatewayConfig) -> Vec<String> {
    let mut filters = Vec::new();
    if config.mqtt.disable_register_set {
        info!("Register set commands disabled, not subscribing to /set/#");
    } else {
        filters.push(config.topic("/set/#"));
    }
    filters.push(config.topic("/connection"));
    filters.push(config.topic("/settings/#"));
    filters
}

/// Queue a subscribe for every filter without waiting for queue space.
///
/// Only the event loop task drains the request queue, so it must never
/// block on it. Filters that did not fit are logged and retried on the
/// next ConnAck. Returns the number of filters queued.
pub fn resubscribe(client: &AsyncClient, config: &GatewayConfig) -> usize {
    let mut queued = 0;
    for filter in subscriptions(config) {
        match client.try_subscribe(filter.as_str(), rumqttc::QoS::AtMostOnce) {
            Ok(()) => {
                debug!(filter = %filter, "Subscribed");
                queued += 1;
            }
            Err(e) => error!(filter = %filter, error = %e, "Subscribe failed"),
        }
    }
    queued
}

/// Drive the client until the process exits.
///
/// Subscriptions are reissued on every ConnAck so they survive broker
/// restarts.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    ctx: Arc<GatewayContext>,
    gateway: CommandGateway,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                resubscribe(&client, &ctx.config());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .handle_message(&publish.topic, &publish.payload)
                        .await;
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_broker() {
        assert_eq!(
            parse_broker("tcp://127.0.0.1:1883").unwrap(),
            ("127.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            parse_broker("mqtt://broker.local:8883").unwrap(),
            ("broker.local".to_string(), 8883)
        );
        assert_eq!(
            parse_broker("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_broker_rejects_garbage() {
        assert!(parse_broker("tcp://:1883").is_err());
        assert!(parse_broker("tcp://host:port").is_err());
        assert!(parse_broker("ws://host:80").is_err());
    }

    #[test]
    fn test_subscriptions() {
        let mut config = GatewayConfig::default();
        assert_eq!(
            subscriptions(&config),
            vec!["phev/set/#", "phev/connection", "phev/settings/#"]
        );

        config.mqtt.disable_register_set = true;
        assert_eq!(
            subscriptions(&config),
            vec!["phev/connection", "phev/settings/#"]
        );
    }

    #[tokio::test]
    async fn test_resubscribe_queues_every_filter() {
        let config = GatewayConfig::default();
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), REQUEST_CAPACITY);
        assert_eq!(resubscribe(&client, &config), 3);
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_block_on_full_queue() {
        let config = GatewayConfig::default();
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), REQUEST_CAPACITY);
        for _ in 0..REQUEST_CAPACITY {
            client
                .publish("phev/battery/level", rumqttc::QoS::AtMostOnce, false, "50")
                .await
                .unwrap();
        }

        let queued = tokio::time::timeout(Duration::from_secs(2), async {
            resubscribe(&client, &config)
        })
        .await
        .expect("resubscribe blocked on a full request queue");
        assert_eq!(queued, 0);
    }
}

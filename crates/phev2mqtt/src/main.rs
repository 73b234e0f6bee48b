//! phev2mqtt - PHEV to MQTT gateway daemon
//!
//! Keeps a connection to a Mitsubishi Outlander PHEV's WiFi control link,
//! publishes vehicle state to an MQTT broker and routes MQTT commands back
//! to the car.
//!
//! Settings come from the environment, a `.env` style config file and the
//! command line, in increasing order of precedence. The config file is
//! watched and reloaded while running unless `config_hot_reload=false`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use phev_bridge::settings::{default_config_path, validate_config_path};
use phev_bridge::{
    discovery, CommandGateway, ConfigHandle, ConfigReloader, ConnectionSupervisor, GatewayConfig,
    GatewayContext, SettingsSource,
};
use tracing::{error, info, warn};

mod logging;
mod mqtt;
mod simulate;

use simulate::SimulatedModel;

#[derive(Parser, Debug)]
#[command(name = "phev2mqtt", version)]
#[command(about = "Bridge a Mitsubishi Outlander PHEV to an MQTT broker")]
struct Args {
    /// Config file in KEY=VALUE format
    /// [default: /config/.env, ./.env or ~/.phev2mqtt.env]
    #[arg(short, long, env = "PHEV2MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker, e.g. tcp://127.0.0.1:1883
    #[arg(long)]
    mqtt_server: Option<String>,

    #[arg(long)]
    mqtt_username: Option<String>,

    #[arg(long)]
    mqtt_password: Option<String>,

    /// Prefix for every gateway topic
    #[arg(long)]
    mqtt_topic_prefix: Option<String>,

    /// Vehicle address, host:port
    #[arg(long)]
    address: Option<String>,

    /// Status refresh period, e.g. 5m
    #[arg(long)]
    update_interval: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Prefix log lines with timestamps
    #[arg(short = 't', long)]
    log_timestamps: bool,

    /// Override any setting, e.g. --set remote_wifi_command_wait=20s
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    set: Vec<(String, String)>,

    /// Run against a simulated vehicle
    #[arg(long)]
    simulate: bool,

    /// Model year reported by the simulated vehicle
    #[arg(long, value_enum, default_value_t = SimulatedModel::My18)]
    simulate_model: SimulatedModel,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

impl Args {
    /// Command-line settings layer
    fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides: Vec<(String, String)> = [
            ("mqtt_server", &self.mqtt_server),
            ("mqtt_username", &self.mqtt_username),
            ("mqtt_password", &self.mqtt_password),
            ("mqtt_topic_prefix", &self.mqtt_topic_prefix),
            ("address", &self.address),
            ("update_interval", &self.update_interval),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key.to_string(), v)))
        .collect();

        match self.verbose {
            0 => {}
            1 => overrides.push(("log_level".to_string(), "debug".to_string())),
            _ => overrides.push(("log_level".to_string(), "trace".to_string())),
        }
        if self.log_timestamps {
            overrides.push(("log_timestamps".to_string(), "true".to_string()));
        }

        overrides.extend(self.set.iter().cloned());
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    if config_path.exists() {
        validate_config_path(&config_path)?;
    }

    let source = SettingsSource::new(Some(config_path.clone()))
        .with_env(std::env::vars())
        .with_overrides(args.overrides());
    let loaded = source.load()?;
    let config = GatewayConfig::from_settings(&loaded.settings)
        .context("Invalid configuration")?;

    let log = logging::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting phev2mqtt");
    info!(path = %config_path.display(), settings = loaded.settings.len(), "Configuration loaded");
    if loaded.blocked > 0 {
        warn!(blocked = loaded.blocked, "Config file keys rejected by allow-list");
    }

    if !args.simulate {
        bail!("No vehicle client is built into this binary; run with --simulate");
    }
    info!(model = ?args.simulate_model, "Using simulated vehicle");
    let device = simulate::device(args.simulate_model);

    let (bus, client, eventloop) = mqtt::connect(&config)?;
    let handle = ConfigHandle::new(config);
    let ctx = Arc::new(GatewayContext::new(
        handle.clone(),
        Arc::new(bus),
        Arc::new(device),
    ));
    let gateway = CommandGateway::new(ctx.clone());

    let mqtt_task = tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        ctx.clone(),
        gateway,
    ));

    let startup = ctx.config();
    if let Some(vin) = &startup.discovery.vehicle_vin {
        info!(vin = %vin, "Using configured VIN");
        if let Err(e) = ctx.publish_raw(&startup.topic("/vin"), vin, true).await {
            warn!(error = %e, "Failed to publish configured VIN");
        }
        discovery::publish_discovery(&ctx, vin).await;
    }

    let reload_task = if startup.hot_reload {
        let reloader = Arc::new(ConfigReloader::new(source, handle));
        reloader.set_callback(move |old, new| {
            if old.logging.level != new.logging.level {
                match log.set_level(&new.logging.level) {
                    Ok(()) => info!(level = %new.logging.level, "Log level changed"),
                    Err(e) => error!(error = %e, "Log level change failed"),
                }
            }
            if old.logging.timestamps != new.logging.timestamps {
                warn!("log_timestamps changes take effect after a restart");
            }
        });
        info!(interval = ?startup.timing.config_reload_interval, "Config hot reload enabled");
        Some(reloader.spawn())
    } else {
        info!("Config hot reload disabled");
        None
    };

    let supervisor = ConnectionSupervisor::new(ctx.clone());
    let supervisor_task = tokio::spawn(async move { supervisor.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    supervisor_task.abort();
    if let Some(task) = reload_task {
        task.abort();
    }
    if let Some(session) = ctx.session() {
        session.close().await;
    }
    ctx.publish_availability(false).await;
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    mqtt_task.abort();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_overrides_from_flags() {
        let args = Args::parse_from([
            "phev2mqtt",
            "--mqtt-server",
            "tcp://broker:1883",
            "-vv",
            "--set",
            "remote_wifi_command_wait=20s",
        ]);
        assert_eq!(
            args.overrides(),
            vec![
                ("mqtt_server".to_string(), "tcp://broker:1883".to_string()),
                ("log_level".to_string(), "trace".to_string()),
                ("remote_wifi_command_wait".to_string(), "20s".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_requires_key_value() {
        assert!(Args::try_parse_from(["phev2mqtt", "--set", "novalue"]).is_err());
        assert!(Args::try_parse_from(["phev2mqtt", "--set", "=x"]).is_err());
    }
}

//! Top-level connection loop

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::context::GatewayContext;
use crate::power::PowerSaveController;
use crate::session::DeviceSessionHandler;

/// Runs device sessions back to back for the life of the process.
///
/// Without power save, a failed or closed session is retried after
/// `connection_retry_interval`. With power save, one session runs per duty
/// period. Either wait is cut short by a wake from the command path.
pub struct ConnectionSupervisor {
    ctx: Arc<GatewayContext>,
    power: PowerSaveController,
    session: DeviceSessionHandler,
}

/// Duty ticker tagged with the period it was built for
struct DutyTicker {
    period: Duration,
    interval: Interval,
}

impl DutyTicker {
    fn new(period: Duration) -> Self {
        // First tick completes immediately
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { period, interval }
    }
}

impl ConnectionSupervisor {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            power: PowerSaveController::new(ctx.clone()),
            session: DeviceSessionHandler::new(ctx.clone()),
            ctx,
        }
    }

    /// Never returns
    pub async fn run(&self) {
        let mut duty: Option<DutyTicker> = None;

        if self.power.is_active() {
            info!("Power save active, managing WiFi on/off cycles");
            self.ctx.set_radio_on(true);
        }
        info!(address = %self.ctx.config().device.address, "Starting vehicle connection loop");

        loop {
            let config = self.ctx.config();

            if config.power_save_active() {
                let period = config.timing.update_interval;
                let ticker = match &mut duty {
                    Some(ticker) if ticker.period == period => ticker,
                    slot => {
                        debug!(period = ?period, "Building power save duty ticker");
                        slot.insert(DutyTicker::new(period))
                    }
                };

                tokio::select! {
                    _ = ticker.interval.tick() => info!("Power save: update cycle started"),
                    _ = self.ctx.wake().wait() => info!("Connection requested by command"),
                }
                self.power.ensure_radio_on().await;
            } else {
                duty = None;
            }

            self.attempt().await;
            self.after_attempt().await;

            // Power save waits on the duty ticker at the top of the loop
            if !self.ctx.config().power_save_active() {
                let retry = self.ctx.config().timing.connection_retry_interval;
                tokio::select! {
                    _ = tokio::time::sleep(retry) => {}
                    _ = self.ctx.wake().wait() => info!("Connection requested, skipping retry wait"),
                }
            }
        }
    }

    /// One session attempt with the enabled flag and edge-triggered error
    /// logging updated from its outcome
    pub async fn attempt(&self) {
        debug!("Attempting vehicle connection");
        match self.session.run().await {
            Ok(()) => {
                if !self.ctx.set_enabled(true) {
                    info!("Connection succeeded, enabling");
                }
            }
            Err(e) => {
                if self.ctx.set_enabled(false) {
                    info!("Connection failed, disabling");
                }
                if self.ctx.record_error(&e.to_string()) {
                    error!(error = %e, "Vehicle connection error");
                }
            }
        }
    }

    /// Availability and WiFi restart checks after an attempt
    pub async fn after_attempt(&self) {
        let config = self.ctx.config();
        let since_connect = self.ctx.connection().last_connect.elapsed();

        if since_connect > config.timing.availability_offline_timeout {
            self.ctx.publish_availability(false).await;
        }

        let restart_time = config.wifi.restart_time;
        if !restart_time.is_zero() && since_connect > restart_time {
            self.restart_wifi().await;
        }
    }

    async fn restart_wifi(&self) {
        let config = self.ctx.config();

        if config.wifi.local_enabled && !config.wifi.command.is_empty() {
            info!("Restarting local WiFi interface");
            match tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(&config.wifi.command)
                .output()
                .await
            {
                Ok(output) => {
                    let combined = [output.stdout, output.stderr].concat();
                    if !combined.is_empty() {
                        info!(output = %String::from_utf8_lossy(&combined).trim(), "Local WiFi restart output");
                    }
                    if !output.status.success() {
                        error!(status = %output.status, "Local WiFi restart failed");
                    }
                }
                Err(e) => error!(error = %e, "Local WiFi restart failed"),
            }
        } else {
            debug!("Local WiFi restart disabled");
        }

        if config.wifi.remote_enabled && !config.wifi.remote_topic.is_empty() {
            let due = self
                .ctx
                .power()
                .last_remote_restart
                .map_or(true, |at| at.elapsed() > config.wifi.remote_min_interval);
            if due {
                self.ctx.mark_remote_restart();
                info!(topic = %config.wifi.remote_topic, "Sending remote WiFi restart");
                if let Err(e) = self
                    .ctx
                    .publish_raw(&config.wifi.remote_topic, &config.wifi.remote_message, false)
                    .await
                {
                    error!(error = %e, "Remote WiFi restart publish failed");
                }
            } else {
                debug!("Remote WiFi restart throttled");
            }
        } else {
            debug!("Remote WiFi restart disabled");
        }
    }

}

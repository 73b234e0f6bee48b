//! Remote radio control and power-save duty cycling
//!
//! When power save is active the vehicle-side WiFi bridge is switched on
//! only for the duration of one session per duty period. The radio is
//! switched by publishing control messages to the configured control
//! topic.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::context::GatewayContext;

#[derive(Clone)]
pub struct PowerSaveController {
    ctx: Arc<GatewayContext>,
}

impl PowerSaveController {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    pub fn is_active(&self) -> bool {
        self.ctx.config().power_save_active()
    }

    /// Session length under duty cycling; `None` when sessions run until
    /// the link drops
    pub fn session_duration(&self) -> Option<Duration> {
        let config = self.ctx.config();
        config
            .power_save_active()
            .then_some(config.power.session_duration)
    }

    /// Switch the radio on and wait for the link, if power save is active
    /// and the radio is off. Returns true if the radio was switched on.
    pub async fn ensure_radio_on(&self) -> bool {
        if !self.is_active() || self.ctx.power().radio_on {
            return false;
        }

        let _guard = self.ctx.radio_lock().lock().await;
        if self.ctx.power().radio_on {
            return false;
        }

        let link_wait = self.ctx.config().power.link_wait;
        self.radio_enable().await;
        info!(wait = ?link_wait, "Waiting for WiFi link to establish");
        tokio::time::sleep(link_wait).await;
        self.ctx.set_radio_on(true);
        true
    }

    /// Switch the radio off after a session, once the command grace period
    /// has passed. No-op unless power save is active and the radio is on.
    pub async fn release_radio(&self) {
        if !self.is_active() || !self.ctx.power().radio_on {
            return;
        }

        let _guard = self.ctx.radio_lock().lock().await;
        // A command arriving during the grace period extends it
        loop {
            let command_wait = self.ctx.config().power.command_wait;
            let remaining = match self.ctx.power().last_command {
                Some(at) => (at + command_wait).saturating_duration_since(Instant::now()),
                None => Duration::ZERO,
            };
            if remaining.is_zero() {
                break;
            }
            info!(remaining = ?remaining, "Command recently sent, keeping WiFi on for status update");
            tokio::time::sleep(remaining).await;
        }

        info!("Power save: connection cycle complete, turning WiFi off");
        self.radio_disable().await;
        self.ctx.set_radio_on(false);
    }

    /// Publish the enable message; radio bookkeeping is left untouched
    pub async fn radio_enable(&self) {
        let config = self.ctx.config();
        self.publish_control(&config.power.control_topic, &config.power.enable_message, "enable")
            .await;
    }

    /// Publish the disable message; radio bookkeeping is left untouched
    pub async fn radio_disable(&self) {
        let config = self.ctx.config();
        self.publish_control(&config.power.control_topic, &config.power.disable_message, "disable")
            .await;
    }

    async fn publish_control(&self, topic: &str, message: &str, action: &str) {
        if topic.is_empty() {
            debug!("Remote WiFi control topic not configured");
            return;
        }
        match self.ctx.publish_raw(topic, message, false).await {
            Ok(()) => info!(topic, action, "WiFi control message published"),
            Err(e) => error!(topic, action, error = %e, "WiFi control message failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHandle, GatewayConfig};
    use phev_core::mock::{MockDevice, RecordingBus};
    use phev_core::ModelYear;

    fn power_save_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.power.enabled = true;
        config.power.control_topic = "router/wifi".to_string();
        config.timing.update_interval = Duration::from_secs(600);
        config
    }

    fn setup(config: GatewayConfig) -> (PowerSaveController, Arc<GatewayContext>, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        let ctx = Arc::new(GatewayContext::new(
            ConfigHandle::new(config),
            bus.clone(),
            Arc::new(MockDevice::new(ModelYear::My18)),
        ));
        (PowerSaveController::new(ctx.clone()), ctx, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_on_waits_for_link() {
        let (power, ctx, bus) = setup(power_save_config());

        let started = Instant::now();
        assert!(power.ensure_radio_on().await);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(ctx.power().radio_on);
        assert_eq!(bus.payloads_for("router/wifi"), vec![r#"{"wifi": "enable"}"#]);

        // Already on
        assert!(!power.ensure_radio_on().await);
        assert_eq!(bus.count_for("router/wifi"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_power_save_never_touches_radio() {
        let (power, ctx, bus) = setup(GatewayConfig::default());
        assert!(!power.ensure_radio_on().await);
        ctx.set_radio_on(true);
        power.release_radio().await;
        assert!(bus.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_honours_command_grace_period() {
        let (power, ctx, bus) = setup(power_save_config());
        ctx.set_radio_on(true);
        ctx.record_command();

        tokio::time::advance(Duration::from_secs(4)).await;
        let started = Instant::now();
        power.release_radio().await;

        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(7));
        assert!(!ctx.power().radio_on);
        assert_eq!(bus.payloads_for("router/wifi"), vec![r#"{"wifi": "disable"}"#]);
    }
}

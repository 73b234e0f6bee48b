//! One device connection's lifetime
//!
//! A session connects, performs the handshake, announces availability and
//! then multiplexes three event sources until it ends:
//!
//! - the periodic refresh timer (`update_interval`)
//! - the power-save session timer (duty cycling only)
//! - the inbound device message stream
//!
//! Whatever the exit path, the session slot is cleared and the radio is
//! released before control returns to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use phev_core::{registers, AckFlag, DeviceHandle, DeviceLink, DeviceMessage, MessageKind};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::GatewayContext;
use crate::error::SessionError;
use crate::power::PowerSaveController;
use crate::translate;

/// Encoding errors tolerated inside one reset window
pub const ENCODING_ERROR_LIMIT: u32 = 50;

/// Counts undecodable frames and trips once too many arrive close together
#[derive(Debug, Clone)]
pub struct EncodingErrorBreaker {
    count: u32,
    last: Option<Instant>,
    reset_after: Duration,
}

impl EncodingErrorBreaker {
    pub fn new(reset_after: Duration) -> Self {
        Self {
            count: 0,
            last: None,
            reset_after,
        }
    }

    /// Record one error at `now`. Returns true when the breaker trips.
    ///
    /// The count restarts when the gap since the previous error exceeds
    /// the reset interval. The error after [`ENCODING_ERROR_LIMIT`]
    /// counted ones trips.
    pub fn record(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) > self.reset_after {
                self.count = 0;
            }
        }
        if self.count >= ENCODING_ERROR_LIMIT {
            return true;
        }
        self.count += 1;
        self.last = Some(now);
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

pub struct DeviceSessionHandler {
    ctx: Arc<GatewayContext>,
    power: PowerSaveController,
}

impl DeviceSessionHandler {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        let power = PowerSaveController::new(ctx.clone());
        Self { ctx, power }
    }

    /// Run one session to completion.
    ///
    /// `Ok(())` means the session was closed deliberately at the end of a
    /// power-save window.
    pub async fn run(&self) -> Result<(), SessionError> {
        let result = self.connect_and_serve().await;

        self.ctx.session_ended();
        // A stale notification must not satisfy a later command waiter
        self.ctx.session_ready().clear();
        self.power.release_radio().await;

        result
    }

    async fn connect_and_serve(&self) -> Result<(), SessionError> {
        let config = self.ctx.config();
        self.ctx.session_ready().clear();

        info!(address = %config.device.address, "Connecting to vehicle");
        let DeviceLink { handle, inbound } = self.ctx.connector().connect(&config.device).await?;

        debug!("Starting device protocol");
        if let Err(e) = handle.start().await {
            handle.close().await;
            return Err(e.into());
        }
        info!(model_year = ?handle.model_year(), "Vehicle connection established");

        self.ctx.publish_availability(true).await;
        self.ctx.session_started(handle.clone());
        self.ctx.session_ready().notify();

        if let Err(e) = request_refresh(handle.as_ref()).await {
            info!(error = %e, "Initial refresh request failed");
        }

        self.serve(handle, inbound).await
    }

    async fn serve(
        &self,
        handle: Arc<dyn DeviceHandle>,
        mut inbound: tokio::sync::mpsc::Receiver<DeviceMessage>,
    ) -> Result<(), SessionError> {
        let config = self.ctx.config();
        let update_interval = config.timing.update_interval;

        let mut refresh =
            tokio::time::interval_at(Instant::now() + update_interval, update_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let session_duration = self.power.session_duration();
        if let Some(duration) = session_duration {
            info!(duration = ?duration, "Power save: session will close after its window");
        }
        let window = async {
            match session_duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(window);

        let mut breaker = EncodingErrorBreaker::new(config.timing.encoding_error_reset_interval);

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    self.power.ensure_radio_on().await;
                    if let Err(e) = request_refresh(handle.as_ref()).await {
                        debug!(error = %e, "Refresh request failed");
                    }
                }
                _ = &mut window => {
                    info!("Power save: session window reached, disconnecting");
                    handle.close().await;
                    return Ok(());
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("Vehicle connection closed");
                        return Err(SessionError::ConnectionClosed);
                    };
                    match message.kind {
                        MessageKind::BadEncoding => {
                            if breaker.record(Instant::now()) {
                                warn!(errors = breaker.count(), "Too many encoding errors, disconnecting");
                                handle.close().await;
                                return Err(SessionError::TooManyEncodingErrors);
                            }
                        }
                        MessageKind::Response if message.ack == AckFlag::Request => {
                            translate::publish_register(&self.ctx, &message).await;
                            if let Err(e) = handle.send(message.acknowledgement()).await {
                                debug!(register = message.register, error = %e, "Acknowledgement failed");
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn request_refresh(handle: &dyn DeviceHandle) -> Result<(), phev_core::DeviceError> {
    handle
        .set_register(registers::REFRESH, &registers::REFRESH_PAYLOAD)
        .await
}

//! Logging setup
//!
//! The level filter sits behind a `reload::Layer` so a hot-reloaded
//! `log_level` takes effect without restarting. `RUST_LOG`, when set, wins
//! over the configured level and is never replaced by a reload.

use anyhow::{Context, Result};
use phev_bridge::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Level directive for a normalised `log_level`; the MQTT client's own
/// chatter is capped at `warn`
pub fn directive(level: &str) -> String {
    match level {
        "off" => "off".to_string(),
        "trace" => "trace".to_string(),
        level => format!("{},rumqttc=warn", level),
    }
}

pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Swap the level filter. No-op when `RUST_LOG` is in control.
    pub fn set_level(&self, level: &str) -> Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.filter
            .reload(EnvFilter::new(directive(level)))
            .context("Failed to update log level")
    }
}

/// Install the global subscriber.
///
/// Without timestamps, output is also stripped of ANSI colours; this is the
/// layout expected when running under a supervisor that stamps lines itself.
pub fn init(config: &LoggingConfig) -> Result<LogHandle> {
    let from_env = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter = if from_env {
        EnvFilter::try_from_default_env().context("Invalid RUST_LOG")?
    } else {
        EnvFilter::new(directive(&config.level))
    };
    let (filter, handle) = reload::Layer::new(filter);

    let (stamped, plain) = if config.timestamps {
        (Some(fmt::layer()), None)
    } else {
        (None, Some(fmt::layer().without_time().with_ansi(false)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stamped)
        .with(plain)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogHandle {
        filter: handle,
        from_env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(directive("info"), "info,rumqttc=warn");
        assert_eq!(directive("off"), "off");
        assert_eq!(directive("trace"), "trace");
    }
}

//! Config file hot reload
//!
//! The config file is polled every `config_reload_interval`. A strictly newer
//! modification time triggers a full reload: all settings layers are read
//! again, a new [`GatewayConfig`] is validated and swapped in. A failed
//! reload keeps the previous snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigHandle, GatewayConfig};
use crate::error::{ConfigError, ReloadError};
use crate::settings::SettingsSource;

type ReloadCallback = Box<dyn Fn(&GatewayConfig, &GatewayConfig) + Send + Sync>;

pub struct ConfigReloader {
    source: SettingsSource,
    config: ConfigHandle,
    last_modified: Mutex<Option<SystemTime>>,
    blocked: AtomicUsize,
    reloads: AtomicUsize,
    callback: RwLock<Option<ReloadCallback>>,
}

impl ConfigReloader {
    /// The current modification time of the file is taken as the baseline,
    /// so the first poll only reloads after a later change.
    pub fn new(source: SettingsSource, config: ConfigHandle) -> Self {
        let last_modified = source.file().and_then(|path| modified(path).ok());
        Self {
            source,
            config,
            last_modified: Mutex::new(last_modified),
            blocked: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
            callback: RwLock::new(None),
        }
    }

    /// Called with the previous and new snapshot while the config write
    /// lock is held. Must not read the config handle.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&GatewayConfig, &GatewayConfig) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Box::new(callback));
    }

    /// Keys rejected by the allow-list across all reloads
    pub fn blocked_count(&self) -> usize {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Successful reloads so far
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Poll the file once. Returns true if a new snapshot was applied.
    pub fn check(&self) -> Result<bool, ReloadError> {
        let Some(path) = self.source.file() else {
            return Ok(false);
        };

        let mtime = match modified(path) {
            Ok(mtime) => mtime,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Config file not readable, skipping reload");
                return Ok(false);
            }
        };

        {
            let mut last = self.last_modified.lock();
            if last.is_some_and(|seen| mtime <= seen) {
                return Ok(false);
            }
            *last = Some(mtime);
        }

        info!(path = %path.display(), "Config file changed, reloading");
        let loaded = self.source.load()?;
        if loaded.blocked > 0 {
            self.blocked.fetch_add(loaded.blocked, Ordering::Relaxed);
            warn!(
                blocked = loaded.blocked,
                total = self.blocked_count(),
                "Config keys rejected by allow-list"
            );
        }

        let next = GatewayConfig::from_settings(&loaded.settings)?;
        let callback = self.callback.read();
        self.config.replace_with(next, |old, new| {
            if old == new {
                debug!("Reloaded config is unchanged");
            }
            if let Some(callback) = callback.as_ref() {
                callback(old, new);
            }
        });

        let reloads = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        info!(reloads, "Configuration reloaded");
        Ok(true)
    }

    /// Poll until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let interval = self.config.current().timing.config_reload_interval;
                tokio::time::sleep(interval).await;
                if let Err(e) = self.check() {
                    warn!(error = %e, "Config reload failed, keeping previous configuration");
                }
            }
        })
    }
}

fn modified(path: &std::path::Path) -> Result<SystemTime, ConfigError> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn touch(file: &NamedTempFile, later_by: Duration) {
        let mtime = std::fs::metadata(file.path()).unwrap().modified().unwrap();
        File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(mtime + later_by)
            .unwrap();
    }

    fn reloader(file: &NamedTempFile) -> (ConfigReloader, ConfigHandle) {
        let source = SettingsSource::new(Some(file.path().to_path_buf()));
        let config = GatewayConfig::from_settings(&source.load().unwrap().settings).unwrap();
        let handle = ConfigHandle::new(config);
        (ConfigReloader::new(source, handle.clone()), handle)
    }

    #[test]
    fn test_unchanged_file_is_not_reloaded() {
        let file = write_config("mqtt_topic_prefix=car\n");
        let (reloader, handle) = reloader(&file);

        assert!(!reloader.check().unwrap());
        assert_eq!(reloader.reload_count(), 0);
        assert_eq!(handle.current().mqtt.topic_prefix, "car");
    }

    #[test]
    fn test_touch_triggers_exactly_one_reload() {
        let file = write_config("update_interval=10m\n");
        let (reloader, _) = reloader(&file);

        touch(&file, Duration::from_secs(10));
        assert!(reloader.check().unwrap());
        assert!(!reloader.check().unwrap());
        assert_eq!(reloader.reload_count(), 1);
    }

    #[test]
    fn test_changed_values_applied_and_callback_invoked() {
        let file = write_config("log_level=info\n");
        let (reloader, handle) = reloader(&file);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        reloader.set_callback(move |old, new| {
            sink.lock()
                .push((old.logging.level.clone(), new.logging.level.clone()));
        });

        std::fs::write(file.path(), "log_level=debug\nupdate_interval=10m\n").unwrap();
        touch(&file, Duration::from_secs(10));
        assert!(reloader.check().unwrap());

        assert_eq!(handle.current().logging.level, "debug");
        assert_eq!(handle.current().timing.update_interval, Duration::from_secs(600));
        assert_eq!(
            *seen.lock(),
            vec![("info".to_string(), "debug".to_string())]
        );
    }

    #[test]
    fn test_disallowed_keys_change_nothing() {
        let file = write_config("");
        let (reloader, handle) = reloader(&file);
        let before = handle.current();

        std::fs::write(file.path(), "PATH=/tmp\naddress=10.0.0.1:8080\n").unwrap();
        touch(&file, Duration::from_secs(10));
        assert!(reloader.check().unwrap());

        assert_eq!(*handle.current(), *before);
        assert_eq!(reloader.blocked_count(), 2);
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let file = write_config("mqtt_topic_prefix=car\n");
        let (reloader, handle) = reloader(&file);

        std::fs::write(file.path(), "mqtt_server=\nmqtt_topic_prefix=other\n").unwrap();
        touch(&file, Duration::from_secs(10));

        let result = reloader.check();
        assert!(matches!(
            result,
            Err(ReloadError::Config(ConfigError::MissingRequired("mqtt_server")))
        ));
        assert_eq!(handle.current().mqtt.topic_prefix, "car");
        assert_eq!(reloader.reload_count(), 0);
    }
}

//! Layered raw settings
//!
//! Settings are plain `key = value` strings collected from three layers,
//! lowest precedence first: process environment, the `.env` config file,
//! command-line overrides. Defaults are applied later by
//! [`GatewayConfig::from_settings`](crate::config::GatewayConfig::from_settings).
//!
//! Only keys with an allow-listed prefix are accepted from the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::KNOWN_KEYS;
use crate::error::ConfigError;

/// Key prefixes accepted from the config file
pub const ALLOWED_PREFIXES: &[&str] = &[
    "mqtt_",
    "phev_",
    "log_",
    "ha_",
    "vehicle_",
    "update_",
    "wifi_",
    "remote_",
    "local_",
    "route_",
    "connection_",
    "availability_",
    "encoding_",
    "config_",
];

/// Values longer than this are truncated
pub const MAX_VALUE_LEN: usize = 4096;

/// Config files larger than this are refused
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

pub fn is_allowed_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ALLOWED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Strip NUL bytes and cap the length at [`MAX_VALUE_LEN`] bytes
pub fn sanitize_value(value: &str) -> String {
    let mut value = value.replace('\0', "");
    if value.len() > MAX_VALUE_LEN {
        warn!(max = MAX_VALUE_LEN, "Config value truncated");
        let mut end = MAX_VALUE_LEN;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Parse `.env` content into `(key, value)` pairs in file order.
///
/// Blank lines, `#` comments and lines without `=` are skipped. A value
/// wrapped in matching single or double quotes is unquoted.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        let mut value = value.trim();
        if value.len() >= 2 {
            let quoted = (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''));
            if quoted {
                value = &value[1..value.len() - 1];
            }
        }

        entries.push((key.to_string(), value.to_string()));
    }

    entries
}

/// The config file layer after allow-list filtering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLayer {
    pub values: BTreeMap<String, String>,
    /// Keys rejected by the allow-list
    pub blocked: usize,
}

impl FileLayer {
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        let mut layer = FileLayer::default();
        for (key, value) in entries {
            if !is_allowed_key(&key) {
                warn!(key = %key, "Ignoring config key outside the allowed prefixes");
                layer.blocked += 1;
                continue;
            }
            // Values are never logged
            debug!(key = %key, "Config key accepted");
            layer
                .values
                .insert(key.to_ascii_lowercase(), sanitize_value(&value));
        }
        if layer.blocked > 0 {
            warn!(blocked = layer.blocked, "Blocked config keys");
        }
        layer
    }
}

/// Check that `path` is safe to read as a config file
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(invalid("path traversal is not allowed"));
    }

    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file"));
    }
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(invalid("file too large (max 1MB)"));
    }
    Ok(())
}

/// Locate the config file: `/config/.env`, then `./.env`, then
/// `~/.phev2mqtt.env`. Falls back to `/config/.env` when none exist.
pub fn default_config_path() -> PathBuf {
    let mut candidates = vec![PathBuf::from("/config/.env"), PathBuf::from(".env")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".phev2mqtt.env"));
    }

    candidates
        .into_iter()
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("/config/.env"))
}

/// Merged settings, keys lowercased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// Result of loading all layers
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// Keys rejected from the config file
    pub blocked: usize,
}

/// Where settings come from; reloaded as a whole on every config change
#[derive(Debug, Clone, Default)]
pub struct SettingsSource {
    file: Option<PathBuf>,
    env: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
}

impl SettingsSource {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            ..Default::default()
        }
    }

    /// Environment layer. Only recognised config keys are kept.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .filter(|(k, _)| KNOWN_KEYS.contains(&k.as_str()))
            .collect();
        self
    }

    /// Command-line layer; wins over everything else
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Read the config file (a missing file is an empty layer) and merge
    /// all layers.
    pub fn load(&self) -> Result<LoadedSettings, ConfigError> {
        let file_layer = match &self.file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) => FileLayer::from_entries(parse_env_file(&content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Config file not found, using defaults");
                    FileLayer::default()
                }
                Err(e) => {
                    return Err(ConfigError::Io {
                        path: path.clone(),
                        source: e,
                    })
                }
            },
            None => FileLayer::default(),
        };

        let mut merged = self.env.clone();
        merged.extend(file_layer.values);
        merged.extend(self.overrides.clone());

        Ok(LoadedSettings {
            settings: Settings { values: merged },
            blocked: file_layer.blocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_env_file() {
        let content = "# comment\n\nMQTT_SERVER = tcp://broker:1883\nmqtt_topic_prefix='car'\nupdate_interval=\"10m\"\nnot a pair\n";
        assert_eq!(
            parse_env_file(content),
            vec![
                ("MQTT_SERVER".to_string(), "tcp://broker:1883".to_string()),
                ("mqtt_topic_prefix".to_string(), "car".to_string()),
                ("update_interval".to_string(), "10m".to_string()),
            ]
        );
    }

    #[test]
    fn test_mismatched_quotes_kept() {
        let entries = parse_env_file("remote_wifi_enable_message='on\"");
        assert_eq!(entries[0].1, "'on\"");
    }

    #[test]
    fn test_allow_list() {
        assert!(is_allowed_key("MQTT_SERVER"));
        assert!(is_allowed_key("remote_wifi_control_topic"));
        assert!(!is_allowed_key("PATH"));
        assert!(!is_allowed_key("address"));
    }

    #[test]
    fn test_sanitize_strips_nul_and_truncates() {
        assert_eq!(sanitize_value("a\0b"), "ab");
        let long = "x".repeat(MAX_VALUE_LEN + 10);
        assert_eq!(sanitize_value(&long).len(), MAX_VALUE_LEN);
    }

    #[test]
    fn test_file_layer_counts_blocked_keys() {
        let layer = FileLayer::from_entries(parse_env_file("PATH=/bin\nmqtt_username=me\nLD_PRELOAD=x"));
        assert_eq!(layer.blocked, 2);
        assert_eq!(layer.values.get("mqtt_username").map(String::as_str), Some("me"));
    }

    #[test]
    fn test_layer_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mqtt_topic_prefix=from-file\nupdate_interval=2m").unwrap();

        let source = SettingsSource::new(Some(file.path().to_path_buf()))
            .with_env(vec![
                ("MQTT_TOPIC_PREFIX".to_string(), "from-env".to_string()),
                ("MQTT_USERNAME".to_string(), "env-user".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .with_overrides(vec![("update_interval".to_string(), "3m".to_string())]);

        let loaded = source.load().unwrap();
        assert_eq!(loaded.settings.get("mqtt_topic_prefix"), Some("from-file"));
        assert_eq!(loaded.settings.get("mqtt_username"), Some("env-user"));
        assert_eq!(loaded.settings.get("update_interval"), Some("3m"));
        assert_eq!(loaded.settings.get("home"), None);
    }

    #[test]
    fn test_missing_file_is_empty_layer() {
        let dir = tempfile::tempdir().unwrap();
        let source = SettingsSource::new(Some(dir.path().join("absent.env")));
        assert!(source.load().unwrap().settings.is_empty());
    }

    #[test]
    fn test_validate_config_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_config_path(dir.path()),
            Err(ConfigError::InvalidPath { .. })
        ));
        assert!(matches!(
            validate_config_path(Path::new("../etc/passwd")),
            Err(ConfigError::InvalidPath { .. })
        ));

        let file = dir.path().join("ok.env");
        std::fs::write(&file, "mqtt_server=tcp://localhost").unwrap();
        assert!(validate_config_path(&file).is_ok());
    }
}

//! Relay configuration – reads/writes `~/.simrelay/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simrelay_middleware::RelayOptions;
use simrelay_types::{Framing, MessageShape, StructuredShape, SubscriptionEntry, GPS_STATUS_TOPIC};

/// Persisted relay configuration.  Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the simulator connects to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// `"per_read"` (legacy clients) or `"newline"`.
    #[serde(default)]
    pub framing: Framing,

    /// Bytes requested per socket read.
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,

    /// Longest accepted frame in newline mode.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Consecutive undeliverable messages before a "no client" warning.
    #[serde(default = "default_no_client_warn_threshold")]
    pub no_client_warn_threshold: u32,

    /// Bus topics relayed to the simulator.
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionEntry>,

    /// Message shape of topics the simulator publishes to; unlisted topics
    /// are plain text.
    #[serde(default = "default_topic_shapes")]
    pub topic_shapes: BTreeMap<String, MessageShape>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    65432
}
fn default_read_buffer_bytes() -> usize {
    simrelay_middleware::inbound::DEFAULT_READ_BUFFER_BYTES
}
fn default_max_frame_bytes() -> usize {
    simrelay_middleware::inbound::DEFAULT_MAX_FRAME_BYTES
}
fn default_write_timeout_ms() -> u64 {
    1000
}
fn default_no_client_warn_threshold() -> u32 {
    simrelay_middleware::liveness::DEFAULT_NO_CLIENT_THRESHOLD
}
fn default_subscriptions() -> Vec<SubscriptionEntry> {
    vec![
        SubscriptionEntry::new("my_ros2_topic", MessageShape::PlainText),
        SubscriptionEntry::new(GPS_STATUS_TOPIC, MessageShape::Structured(StructuredShape::Gps)),
    ]
}
fn default_topic_shapes() -> BTreeMap<String, MessageShape> {
    BTreeMap::from([(
        GPS_STATUS_TOPIC.to_string(),
        MessageShape::Structured(StructuredShape::Gps),
    )])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            framing: Framing::default(),
            read_buffer_bytes: default_read_buffer_bytes(),
            max_frame_bytes: default_max_frame_bytes(),
            write_timeout_ms: default_write_timeout_ms(),
            no_client_warn_threshold: default_no_client_warn_threshold(),
            subscriptions: default_subscriptions(),
            topic_shapes: default_topic_shapes(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Translate into the engine's start-up options.
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            bind_addr: self.bind_addr(),
            framing: self.framing,
            read_buffer_bytes: self.read_buffer_bytes,
            max_frame_bytes: self.max_frame_bytes,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            no_client_threshold: self.no_client_warn_threshold,
            subscriptions: self.subscriptions.clone(),
            topic_shapes: self.topic_shapes.clone().into_iter().collect(),
        }
    }
}

/// Return the config path: `$SIMRELAY_CONFIG`, else `~/.simrelay/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("SIMRELAY_CONFIG") {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".simrelay").join("config.toml")
}

/// Load the file config (or defaults when absent) and apply environment
/// overrides.
pub fn resolve() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SIMRELAY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SIMRELAY_HOST` | `host` |
/// | `SIMRELAY_PORT` | `port` |
/// | `SIMRELAY_FRAMING` | `framing` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SIMRELAY_HOST") {
        cfg.host = v;
    }
    if let Some(port) = lookup("SIMRELAY_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.port = port;
    }
    if let Some(framing) = lookup("SIMRELAY_FRAMING").and_then(|v| v.parse::<Framing>().ok()) {
        cfg.framing = framing;
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;

    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

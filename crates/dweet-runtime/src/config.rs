//! Project configuration loading (`runtime.toml`).

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::RuntimeError;

pub const RUNTIME_FILE_NAME: &str = "runtime.toml";
const DEFAULT_CATALOG_FILE: &str = "dashboard.json";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE_S: u64 = 60;
const DEFAULT_RECONNECT_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_REPLAY_INTERVAL_MS: u64 = 1_000;

/// Which feed refreshes the live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Live,
    Replay,
}

impl FeedMode {
    fn parse(text: &str) -> Result<Self, RuntimeError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "replay" | "demo" => Ok(Self::Replay),
            _ => Err(RuntimeError::InvalidConfig(
                format!("invalid runtime.mode '{text}'").into(),
            )),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: FeedMode,
    pub log_level: SmolStr,
    pub catalog_path: PathBuf,
    pub broker: BrokerConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: SmolStr,
    pub port: u16,
    pub topic: SmolStr,
    pub client_id: SmolStr,
    pub keep_alive: Duration,
    pub reconnect: Duration,
    pub reconnect_max: Duration,
}

impl BrokerConfig {
    /// Broker settings for `host:port` with default timings.
    #[must_use]
    pub fn new(host: impl Into<SmolStr>, port: u16, topic: impl Into<SmolStr>) -> Self {
        Self {
            host: host.into(),
            port,
            topic: topic.into(),
            client_id: SmolStr::new(default_client_id()),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_S),
            reconnect: Duration::from_millis(DEFAULT_RECONNECT_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub file: Option<PathBuf>,
    pub interval: Duration,
    pub header_rows: usize,
    pub delimiter: u8,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            file: None,
            interval: Duration::from_millis(DEFAULT_REPLAY_INTERVAL_MS),
            header_rows: 0,
            delimiter: b',',
        }
    }
}

impl RuntimeConfig {
    /// Load `runtime.toml` from a project folder, resolving relative paths
    /// against that folder.
    pub fn load_project(root: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(RuntimeError::InvalidConfig(
                format!("project folder not found: {}", root.display()).into(),
            ));
        }
        let path = root.join(RUNTIME_FILE_NAME);
        if !path.is_file() {
            return Err(RuntimeError::InvalidConfig(
                format!("missing runtime.toml at {}", path.display()).into(),
            ));
        }
        let mut config = Self::load(&path)?;
        config.catalog_path = resolve(root, &config.catalog_path);
        config.replay.file = config.replay.file.map(|file| resolve(root, &file));
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            RuntimeError::InvalidConfig(format!("{RUNTIME_FILE_NAME}: {err}").into())
        })?;
        parse_runtime_toml_from_text(&text, RUNTIME_FILE_NAME)
    }
}

pub fn validate_runtime_toml_text(text: &str) -> Result<(), RuntimeError> {
    parse_runtime_toml_from_text(text, RUNTIME_FILE_NAME).map(|_| ())
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn default_client_id() -> String {
    format!("dweet-runtime-{}", std::process::id())
}

fn parse_runtime_toml_from_text(
    text: &str,
    file_name: &str,
) -> Result<RuntimeConfig, RuntimeError> {
    let raw: RuntimeToml = toml::from_str(text)
        .map_err(|err| RuntimeError::InvalidConfig(format!("{file_name}: {err}").into()))?;
    raw.into_config()
        .map_err(|err| prefix_invalid_config(file_name, err))
}

fn prefix_invalid_config(file_name: &str, err: RuntimeError) -> RuntimeError {
    match err {
        RuntimeError::InvalidConfig(message) => {
            RuntimeError::InvalidConfig(format!("{file_name}: {message}").into())
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeToml {
    #[serde(default)]
    runtime: RuntimeSection,
    broker: BrokerSection,
    replay: Option<ReplaySection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeSection {
    mode: Option<String>,
    log_level: Option<String>,
    catalog: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrokerSection {
    host: String,
    port: Option<u16>,
    topic: String,
    client_id: Option<String>,
    keep_alive_s: Option<u64>,
    reconnect_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplaySection {
    file: Option<String>,
    interval_ms: Option<u64>,
    header_rows: Option<usize>,
    delimiter: Option<String>,
}

impl RuntimeToml {
    fn into_config(self) -> Result<RuntimeConfig, RuntimeError> {
        let mode = FeedMode::parse(self.runtime.mode.as_deref().unwrap_or("live"))?;
        let log_level = self
            .runtime
            .log_level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        if log_level.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "runtime.log_level must not be empty".into(),
            ));
        }
        let catalog = self
            .runtime
            .catalog
            .unwrap_or_else(|| DEFAULT_CATALOG_FILE.to_string());
        if catalog.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "runtime.catalog must not be empty".into(),
            ));
        }

        let broker = self.broker.into_config()?;
        let replay = self
            .replay
            .map(ReplaySection::into_config)
            .transpose()?
            .unwrap_or_default();
        if mode == FeedMode::Replay && replay.file.is_none() {
            return Err(RuntimeError::InvalidConfig(
                "replay.file required when runtime.mode=replay".into(),
            ));
        }

        Ok(RuntimeConfig {
            mode,
            log_level: SmolStr::new(log_level.trim()),
            catalog_path: PathBuf::from(catalog.trim()),
            broker,
            replay,
        })
    }
}

impl BrokerSection {
    fn into_config(self) -> Result<BrokerConfig, RuntimeError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "broker.host must not be empty".into(),
            ));
        }
        let port = self.port.unwrap_or(DEFAULT_BROKER_PORT);
        if port == 0 {
            return Err(RuntimeError::InvalidConfig(
                "broker.port must be >= 1".into(),
            ));
        }
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "broker.topic must not be empty".into(),
            ));
        }
        if topic.contains(['+', '#']) {
            return Err(RuntimeError::InvalidConfig(
                format!("broker.topic '{topic}' must not contain wildcards").into(),
            ));
        }
        let keep_alive_s = self.keep_alive_s.unwrap_or(DEFAULT_KEEP_ALIVE_S);
        if keep_alive_s == 0 {
            return Err(RuntimeError::InvalidConfig(
                "broker.keep_alive_s must be >= 1".into(),
            ));
        }
        let reconnect_ms = self.reconnect_ms.unwrap_or(DEFAULT_RECONNECT_MS);
        if reconnect_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "broker.reconnect_ms must be >= 1".into(),
            ));
        }
        let reconnect_max_ms = self
            .reconnect_max_ms
            .unwrap_or(DEFAULT_RECONNECT_MAX_MS.max(reconnect_ms));
        if reconnect_max_ms < reconnect_ms {
            return Err(RuntimeError::InvalidConfig(
                "broker.reconnect_max_ms must be >= broker.reconnect_ms".into(),
            ));
        }
        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(default_client_id);

        Ok(BrokerConfig {
            host: SmolStr::new(host),
            port,
            topic: SmolStr::new(topic),
            client_id: SmolStr::new(client_id),
            keep_alive: Duration::from_secs(keep_alive_s),
            reconnect: Duration::from_millis(reconnect_ms),
            reconnect_max: Duration::from_millis(reconnect_max_ms),
        })
    }
}

impl ReplaySection {
    fn into_config(self) -> Result<ReplayConfig, RuntimeError> {
        let interval_ms = self.interval_ms.unwrap_or(DEFAULT_REPLAY_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "replay.interval_ms must be >= 1".into(),
            ));
        }
        let delimiter = match self.delimiter.as_deref() {
            None => b',',
            Some("\\t") => b'\t',
            Some(text) => match text.as_bytes() {
                [byte] if byte.is_ascii() => *byte,
                _ => {
                    return Err(RuntimeError::InvalidConfig(
                        format!("replay.delimiter '{text}' must be a single ASCII character")
                            .into(),
                    ))
                }
            },
        };
        let file = self
            .file
            .map(|file| file.trim().to_string())
            .filter(|file| !file.is_empty())
            .map(PathBuf::from);
        Ok(ReplayConfig {
            file,
            interval: Duration::from_millis(interval_ms),
            header_rows: self.header_rows.unwrap_or(0),
            delimiter,
        })
    }
}

//! Channel catalog: loading, layout handling, and atomic persistence.
//!
//! The catalog file is a JSON object carrying either a flat
//! `dashboard_gauges` list or a grouped `dashboard_groups` list. Every other
//! top-level key is kept verbatim so a rewrite preserves it, and the layout
//! that was loaded is the layout written back.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::RuntimeError;

pub const GROUPED_KEY: &str = "dashboard_groups";
pub const FLAT_KEY: &str = "dashboard_gauges";

/// How a channel is drawn. Serialized with the original capitalized names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderKind {
    #[default]
    #[serde(alias = "gauge")]
    Gauge,
    #[serde(alias = "line")]
    Line,
    #[serde(alias = "bar")]
    Bar,
}

impl RenderKind {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "gauge" => Some(Self::Gauge),
            "line" => Some(Self::Line),
            "bar" => Some(Self::Bar),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "Gauge",
            Self::Line => "Line",
            Self::Bar => "Bar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "value_key")]
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "min_val", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "max_val", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "graph_type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RenderKind>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    #[must_use]
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            min: None,
            max: None,
            color: None,
            kind: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub name: String,
    #[serde(default)]
    pub gauges: Vec<Channel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLayout {
    Flat(Vec<Channel>),
    Grouped(Vec<ChannelGroup>),
}

impl CatalogLayout {
    /// Every channel in layout order, ignoring grouping.
    pub fn flatten(&self) -> impl Iterator<Item = &Channel> + '_ {
        let (flat, grouped) = match self {
            Self::Flat(channels) => (Some(channels.iter()), None),
            Self::Grouped(groups) => (
                None,
                Some(groups.iter().flat_map(|group| group.gauges.iter())),
            ),
        };
        flat.into_iter().flatten().chain(grouped.into_iter().flatten())
    }

    fn channel_mut(&mut self, key: &str) -> Option<&mut Channel> {
        match self {
            Self::Flat(channels) => channels.iter_mut().find(|channel| channel.key == key),
            Self::Grouped(groups) => groups
                .iter_mut()
                .flat_map(|group| group.gauges.iter_mut())
                .find(|channel| channel.key == key),
        }
    }

    fn document_key(&self) -> &'static str {
        match self {
            Self::Flat(_) => FLAT_KEY,
            Self::Grouped(_) => GROUPED_KEY,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Flat(channels) => serde_json::to_value(channels),
            Self::Grouped(groups) => serde_json::to_value(groups),
        }
    }
}

/// In-memory catalog document.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    layout: Option<CatalogLayout>,
    document: Map<String, Value>,
}

impl Catalog {
    #[must_use]
    pub fn new(layout: CatalogLayout) -> Self {
        Self {
            layout: Some(layout),
            document: Map::new(),
        }
    }

    /// Parse a catalog document. A document with neither layout key is
    /// reported and yields an empty catalog.
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| RuntimeError::InvalidConfig(format!("catalog: {err}").into()))?;
        let Value::Object(document) = value else {
            return Err(RuntimeError::InvalidConfig(
                "catalog: top-level value must be an object".into(),
            ));
        };

        let layout = if let Some(groups) = document.get(GROUPED_KEY) {
            let groups: Vec<ChannelGroup> = serde_json::from_value(groups.clone())
                .map_err(|err| {
                    RuntimeError::InvalidConfig(format!("catalog: {GROUPED_KEY}: {err}").into())
                })?;
            Some(CatalogLayout::Grouped(groups))
        } else if let Some(channels) = document.get(FLAT_KEY) {
            let channels: Vec<Channel> = serde_json::from_value(channels.clone())
                .map_err(|err| {
                    RuntimeError::InvalidConfig(format!("catalog: {FLAT_KEY}: {err}").into())
                })?;
            Some(CatalogLayout::Flat(channels))
        } else {
            error!("catalog has neither '{GROUPED_KEY}' nor '{FLAT_KEY}'; no channels available");
            None
        };

        let catalog = Self { layout, document };
        catalog.check_unique_keys()?;
        Ok(catalog)
    }

    fn check_unique_keys(&self) -> Result<(), RuntimeError> {
        let mut seen = HashSet::new();
        for channel in self.channels() {
            if channel.key.is_empty() {
                return Err(RuntimeError::InvalidConfig(
                    "catalog: channel value_key must not be empty".into(),
                ));
            }
            if !seen.insert(channel.key.as_str()) {
                return Err(RuntimeError::InvalidConfig(
                    format!("catalog: duplicate channel key '{}'", channel.key).into(),
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> Option<&CatalogLayout> {
        self.layout.as_ref()
    }

    /// All channels in layout order; empty when the layout was not recognized.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> + '_ {
        self.layout.iter().flat_map(|layout| layout.flatten())
    }

    #[must_use]
    pub fn channel(&self, key: &str) -> Option<&Channel> {
        self.channels().find(|channel| channel.key == key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.channel(key).is_some()
    }

    #[must_use]
    pub fn keys(&self) -> HashSet<String> {
        self.channels().map(|channel| channel.key.clone()).collect()
    }

    fn channel_mut(&mut self, key: &str) -> Option<&mut Channel> {
        self.layout.as_mut()?.channel_mut(key)
    }

    /// Render the document the way it was loaded, pretty-printed with four
    /// space indentation.
    pub fn to_json_pretty(&self) -> Result<String, RuntimeError> {
        let mut document = self.document.clone();
        if let Some(layout) = self.layout.as_ref() {
            let value = layout.to_value().map_err(|err| {
                RuntimeError::Persist(format!("serialize catalog: {err}").into())
            })?;
            document.insert(layout.document_key().to_string(), value);
        }
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        Value::Object(document)
            .serialize(&mut serializer)
            .map_err(|err| RuntimeError::Persist(format!("serialize catalog: {err}").into()))?;
        out.push(b'\n');
        String::from_utf8(out)
            .map_err(|err| RuntimeError::Persist(format!("serialize catalog: {err}").into()))
    }
}

/// Owner of the catalog and its backing file.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    catalog: RwLock<Catalog>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref().to_path_buf();
        let catalog = read_catalog(&path)?;
        info!(
            "loaded catalog {} ({} channels)",
            path.display(),
            catalog.channels().count()
        );
        Ok(Self {
            path,
            catalog: RwLock::new(catalog),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point-in-time copy of the whole catalog.
    #[must_use]
    pub fn catalog(&self) -> Catalog {
        self.catalog.read().clone()
    }

    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.catalog.read().channels().cloned().collect()
    }

    #[must_use]
    pub fn channel(&self, key: &str) -> Option<Channel> {
        self.catalog.read().channel(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.catalog.read().contains(key)
    }

    #[must_use]
    pub fn keys(&self) -> HashSet<String> {
        self.catalog.read().keys()
    }

    /// Re-read the backing file, replacing the in-memory catalog.
    pub fn reload(&self) -> Result<(), RuntimeError> {
        let _guard = self.write_lock.lock();
        let catalog = read_catalog(&self.path)?;
        *self.catalog.write() = catalog;
        Ok(())
    }

    /// Apply `edit` to one channel and persist the whole catalog.
    ///
    /// The read-modify-write runs under the store's write lock. The in-memory
    /// catalog is only replaced after the file has been rewritten, so a failed
    /// edit or write leaves both untouched.
    pub fn commit_with<F>(&self, key: &str, edit: F) -> Result<Channel, RuntimeError>
    where
        F: FnOnce(&mut Channel) -> Result<(), RuntimeError>,
    {
        let _guard = self.write_lock.lock();
        let mut next = self.catalog.read().clone();
        let channel = next
            .channel_mut(key)
            .ok_or_else(|| RuntimeError::validation(format!("unknown channel '{key}'")))?;
        edit(channel)?;
        let updated = channel.clone();
        let text = next.to_json_pretty()?;
        write_atomic(&self.path, text.as_bytes())?;
        *self.catalog.write() = next;
        debug!("persisted catalog {} after edit of '{key}'", self.path.display());
        Ok(updated)
    }
}

fn read_catalog(path: &Path) -> Result<Catalog, RuntimeError> {
    let text = fs::read_to_string(path).map_err(|err| {
        RuntimeError::InvalidConfig(format!("catalog {}: {err}", path.display()).into())
    })?;
    Catalog::parse(&text).map_err(|err| match err {
        RuntimeError::InvalidConfig(message) => {
            RuntimeError::InvalidConfig(format!("{}: {message}", path.display()).into())
        }
        other => other,
    })
}

/// Write `payload` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), RuntimeError> {
    let persist_err =
        |what: &str, err: std::io::Error| RuntimeError::Persist(format!("{what}: {err}").into());
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "catalog".into());
    tmp_name.push(".partial");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path)
        .map_err(|err| persist_err(&format!("create {}", tmp_path.display()), err))?;
    file.write_all(payload)
        .and_then(|()| file.sync_all())
        .map_err(|err| persist_err(&format!("write {}", tmp_path.display()), err))?;
    drop(file);
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(persist_err(&format!("commit {}", path.display()), err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{stamp}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    const GROUPED: &str = r#"{
    "mqtt_broker": "broker.hivemq.com",
    "dashboard_groups": [
        {
            "name": "Grid",
            "gauges": [
                {"value_key": "V1(V)", "title": "Voltage L1", "min_val": 0, "max_val": 300},
                {"value_key": "A1(A)", "title": "Current L1", "color": "orange", "unit": "A"}
            ]
        },
        {
            "name": "Generator",
            "gauges": [
                {"value_key": "PG_P1(KW)", "title": "Power", "graph_type": "Bar"}
            ]
        }
    ],
    "update_interval": 1
}"#;

    #[test]
    fn grouped_layout_flattens_in_order() {
        let catalog = Catalog::parse(GROUPED).expect("parse grouped catalog");
        assert!(matches!(catalog.layout(), Some(CatalogLayout::Grouped(_))));
        let keys = catalog
            .channels()
            .map(|channel| channel.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["V1(V)", "A1(A)", "PG_P1(KW)"]);
        let power = catalog.channel("PG_P1(KW)").expect("power channel");
        assert_eq!(power.kind, Some(RenderKind::Bar));
        let voltage = catalog.channel("V1(V)").expect("voltage channel");
        assert_eq!(voltage.max, Some(300.0));
    }

    #[test]
    fn flat_layout_is_written_back_flat_with_extra_keys() {
        let text = json!({
            "mqtt_topic": "dweet/readings",
            "dashboard_gauges": [
                {"value_key": "V1(V)", "title": "Voltage"}
            ]
        })
        .to_string();
        let catalog = Catalog::parse(&text).expect("parse flat catalog");
        let written = catalog.to_json_pretty().expect("render catalog");
        let value: Value = serde_json::from_str(&written).expect("reparse");
        assert!(value.get(FLAT_KEY).is_some());
        assert!(value.get(GROUPED_KEY).is_none());
        assert_eq!(value["mqtt_topic"], json!("dweet/readings"));
        assert!(written.contains("\n    \"mqtt_topic\""));
    }

    #[test]
    fn unknown_channel_fields_survive_round_trip() {
        let catalog = Catalog::parse(GROUPED).expect("parse grouped catalog");
        let written = catalog.to_json_pretty().expect("render catalog");
        let reparsed = Catalog::parse(&written).expect("reparse");
        let current = reparsed.channel("A1(A)").expect("current channel");
        assert_eq!(current.extra.get("unit"), Some(&json!("A")));
        assert_eq!(
            reparsed.channels().collect::<Vec<_>>(),
            catalog.channels().collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_layout_yields_empty_catalog() {
        let catalog = Catalog::parse(r#"{"mqtt_broker": "localhost"}"#)
            .expect("unrecognized layout is not fatal");
        assert!(catalog.layout().is_none());
        assert_eq!(catalog.channels().count(), 0);
        let written = catalog.to_json_pretty().expect("render catalog");
        assert!(!written.contains(FLAT_KEY));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let text = r#"{"dashboard_gauges": [
            {"value_key": "V1(V)", "title": "a"},
            {"value_key": "V1(V)", "title": "b"}
        ]}"#;
        let err = Catalog::parse(text).expect_err("duplicate keys should fail");
        assert!(err.to_string().contains("duplicate channel key 'V1(V)'"));
    }

    #[test]
    fn commit_with_failed_edit_leaves_file_untouched() {
        let root = temp_dir("dweet-catalog-commit");
        let path = root.join("dashboard.json");
        fs::write(&path, GROUPED).expect("write catalog");
        let store = ConfigStore::load(&path).expect("load store");

        let err = store
            .commit_with("V1(V)", |_| Err(RuntimeError::validation("nope")))
            .expect_err("edit error should propagate");
        assert_eq!(err, RuntimeError::validation("nope"));
        assert_eq!(fs::read_to_string(&path).expect("read catalog"), GROUPED);

        let err = store
            .commit_with("missing", |_| Ok(()))
            .expect_err("unknown channel");
        assert!(matches!(err, RuntimeError::Validation(_)));

        let updated = store
            .commit_with("A1(A)", |channel| {
                channel.title = "Phase A".to_string();
                Ok(())
            })
            .expect("commit edit");
        assert_eq!(updated.title, "Phase A");
        store.reload().expect("reload");
        assert_eq!(store.channel("A1(A)").expect("channel").title, "Phase A");
        assert!(!root.join("dashboard.json.partial").exists());
        let _ = fs::remove_dir_all(root);
    }
}

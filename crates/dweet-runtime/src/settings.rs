//! Draft display settings and their reconciliation with the catalog.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Channel, ConfigStore, RenderKind};
use crate::error::RuntimeError;

pub const DEFAULT_MIN: f64 = 0.0;
pub const DEFAULT_MAX: f64 = 100.0;
pub const DEFAULT_COLOR: &str = "darkblue";
pub const DEFAULT_KIND: RenderKind = RenderKind::Gauge;

/// Unsaved edits for one channel. Numeric fields keep the text as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl DraftSetting {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.color.is_none()
            && self.kind.is_none()
    }

    pub fn merge_from(&mut self, other: &Self) {
        if other.title.is_some() {
            self.title = other.title.clone();
        }
        if other.min.is_some() {
            self.min = other.min.clone();
        }
        if other.max.is_some() {
            self.max = other.max.clone();
        }
        if other.color.is_some() {
            self.color = other.color.clone();
        }
        if other.kind.is_some() {
            self.kind = other.kind.clone();
        }
    }

    fn apply_to(&self, channel: &mut Channel) -> Result<(), RuntimeError> {
        let min = self
            .min
            .as_deref()
            .map(|text| parse_bound("min", text))
            .transpose()?;
        let max = self
            .max
            .as_deref()
            .map(|text| parse_bound("max", text))
            .transpose()?;
        let kind = self
            .kind
            .as_deref()
            .map(|text| {
                RenderKind::parse(text).ok_or_else(|| {
                    RuntimeError::validation(format!(
                        "graph type '{text}' is not one of Gauge, Line, Bar"
                    ))
                })
            })
            .transpose()?;

        if let Some(title) = &self.title {
            channel.title = title.clone();
        }
        if min.is_some() {
            channel.min = min;
        }
        if max.is_some() {
            channel.max = max;
        }
        if let Some(color) = &self.color {
            channel.color = Some(normalize_color(Some(color.as_str())).to_string());
        }
        if kind.is_some() {
            channel.kind = kind;
        }
        Ok(())
    }
}

/// What the renderer draws for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSettings {
    pub key: String,
    pub title: String,
    pub min: f64,
    pub max: f64,
    pub color: String,
    pub kind: RenderKind,
}

impl EffectiveSettings {
    fn resolve(key: &str, channel: Option<&Channel>, draft: Option<&DraftSetting>) -> Self {
        let title = draft
            .and_then(|draft| draft.title.clone())
            .or_else(|| {
                channel
                    .map(|channel| channel.title.clone())
                    .filter(|title| !title.is_empty())
            })
            .unwrap_or_else(|| key.to_string());
        let min = draft
            .and_then(|draft| draft.min.as_deref())
            .and_then(parse_finite)
            .or_else(|| channel.and_then(|channel| channel.min))
            .unwrap_or(DEFAULT_MIN);
        let max = draft
            .and_then(|draft| draft.max.as_deref())
            .and_then(parse_finite)
            .or_else(|| channel.and_then(|channel| channel.max))
            .unwrap_or(DEFAULT_MAX);
        let color = draft
            .and_then(|draft| draft.color.as_deref())
            .or_else(|| channel.and_then(|channel| channel.color.as_deref()));
        let kind = draft
            .and_then(|draft| draft.kind.as_deref())
            .and_then(RenderKind::parse)
            .or_else(|| channel.and_then(|channel| channel.kind))
            .unwrap_or(DEFAULT_KIND);
        Self {
            key: key.to_string(),
            title,
            min,
            max,
            color: normalize_color(color).to_string(),
            kind,
        }
    }
}

/// Colors shorter than three characters fall back to the default.
#[must_use]
pub fn normalize_color(color: Option<&str>) -> &str {
    match color.map(str::trim) {
        Some(color) if color.chars().count() >= 3 => color,
        _ => DEFAULT_COLOR,
    }
}

fn parse_finite(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_bound(field: &str, text: &str) -> Result<f64, RuntimeError> {
    parse_finite(text)
        .ok_or_else(|| RuntimeError::validation(format!("{field} '{text}' is not a finite number")))
}

/// Holds drafts and commits them through the [`ConfigStore`].
#[derive(Debug)]
pub struct SettingsReconciler {
    store: Arc<ConfigStore>,
    drafts: Mutex<BTreeMap<String, DraftSetting>>,
}

impl SettingsReconciler {
    #[must_use]
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            drafts: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Overwrite the fields `partial` carries in the draft for `key`.
    pub fn propose_edit(&self, key: &str, partial: &DraftSetting) {
        let mut drafts = self.drafts.lock();
        drafts.entry(key.to_string()).or_default().merge_from(partial);
        debug!("draft updated for '{key}'");
    }

    /// Drop any pending draft for `key`.
    pub fn discard(&self, key: &str) -> Option<DraftSetting> {
        self.drafts.lock().remove(key)
    }

    #[must_use]
    pub fn draft(&self, key: &str) -> Option<DraftSetting> {
        self.drafts.lock().get(key).cloned()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.drafts.lock().keys().cloned().collect()
    }

    /// Validate the draft for `key`, merge it into the catalog, and persist.
    ///
    /// A rejected commit changes nothing and keeps the draft.
    pub fn commit(&self, key: &str) -> Result<EffectiveSettings, RuntimeError> {
        let draft = self
            .draft(key)
            .ok_or_else(|| RuntimeError::validation(format!("no pending edit for '{key}'")))?;
        let channel = self
            .store
            .commit_with(key, |channel| draft.apply_to(channel))
            .inspect_err(|err| warn!("commit for '{key}' rejected: {err}"))?;

        let mut drafts = self.drafts.lock();
        if drafts.get(key) == Some(&draft) {
            drafts.remove(key);
        }
        let remaining = drafts.get(key).cloned();
        drop(drafts);
        info!("committed settings for '{key}'");
        Ok(EffectiveSettings::resolve(key, Some(&channel), remaining.as_ref()))
    }

    /// Draft over persisted over defaults, field by field.
    #[must_use]
    pub fn effective_settings(&self, key: &str) -> EffectiveSettings {
        let draft = self.draft(key);
        let channel = self.store.channel(key);
        EffectiveSettings::resolve(key, channel.as_ref(), draft.as_ref())
    }

    /// Effective settings for every catalog channel in layout order.
    #[must_use]
    pub fn effective_catalog(&self) -> Vec<EffectiveSettings> {
        let drafts = self.drafts.lock().clone();
        self.store
            .channels()
            .iter()
            .map(|channel| {
                EffectiveSettings::resolve(&channel.key, Some(channel), drafts.get(&channel.key))
            })
            .collect()
    }
}

//! Data plane for the dweet dashboard.
//!
//! Readings arrive either from an MQTT topic (live) or from a recorded table
//! replayed onto that same topic (replay). Both feeds land in a
//! [`LiveStateCache`]; the renderer reads snapshots of it together with the
//! per-channel display settings held by the [`SettingsReconciler`].

#![warn(missing_docs)]

pub mod broker;
pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod live;
pub mod metrics;
pub mod replay;
pub mod settings;

pub use broker::{BrokerSubscriber, MqttPublisher, Publisher, SubscriberHandle};
pub use catalog::{Catalog, CatalogLayout, Channel, ChannelGroup, ConfigStore, RenderKind};
pub use config::{BrokerConfig, FeedMode, ReplayConfig, RuntimeConfig};
pub use dashboard::{ChannelView, Dashboard};
pub use error::RuntimeError;
pub use live::{LiveSnapshot, LiveStateCache, Readings};
pub use metrics::{FeedMetrics, FeedStats};
pub use replay::{ReplayEngine, ReplayState, ReplaySummary, ReplayTable, StartOutcome};
pub use settings::{DraftSetting, EffectiveSettings, SettingsReconciler};

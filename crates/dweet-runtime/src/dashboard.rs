//! Renderer-facing facade over the data plane.
//!
//! A [`Dashboard`] owns one of each component: the catalog store, the live
//! cache, the settings reconciler, the replay engine, and (in live mode) the
//! broker subscription. Only one feed runs at a time.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::broker::{BrokerSubscriber, MqttPublisher, Publisher, SubscriberHandle};
use crate::catalog::{ConfigStore, RenderKind};
use crate::config::{FeedMode, RuntimeConfig};
use crate::error::RuntimeError;
use crate::live::{LiveSnapshot, LiveStateCache};
use crate::metrics::{FeedMetrics, FeedStats};
use crate::replay::{ReplayEngine, ReplayState, ReplaySummary, StartOutcome};
use crate::settings::{DraftSetting, EffectiveSettings, SettingsReconciler};

/// One catalog channel as the renderer draws it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelView {
    pub key: String,
    pub title: String,
    pub min: f64,
    pub max: f64,
    pub color: String,
    pub kind: RenderKind,
    pub value: f64,
}

impl ChannelView {
    fn new(settings: EffectiveSettings, value: f64) -> Self {
        Self {
            key: settings.key,
            title: settings.title,
            min: settings.min,
            max: settings.max,
            color: settings.color,
            kind: settings.kind,
            value,
        }
    }
}

pub struct Dashboard {
    config: RuntimeConfig,
    store: Arc<ConfigStore>,
    cache: LiveStateCache,
    metrics: FeedMetrics,
    settings: SettingsReconciler,
    replay: ReplayEngine,
    subscriber: Mutex<Option<SubscriberHandle>>,
}

impl Dashboard {
    /// Load the catalog. No feed is started and no broker session is opened;
    /// the replay publisher connects on its first publish.
    pub fn open(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let metrics = FeedMetrics::new();
        let publisher = MqttPublisher::new(&config.broker, metrics.clone());
        Self::assemble(config, Arc::new(publisher), metrics)
    }

    /// Like [`Dashboard::open`] with a caller-supplied publisher.
    pub fn with_publisher(
        config: RuntimeConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, RuntimeError> {
        Self::assemble(config, publisher, FeedMetrics::new())
    }

    fn assemble(
        config: RuntimeConfig,
        publisher: Arc<dyn Publisher>,
        metrics: FeedMetrics,
    ) -> Result<Self, RuntimeError> {
        let store = Arc::new(ConfigStore::load(&config.catalog_path)?);
        let cache = LiveStateCache::new();
        let replay = ReplayEngine::new(
            config.replay.clone(),
            config.broker.topic.clone(),
            store.keys(),
            cache.clone(),
            publisher,
            metrics.clone(),
        );
        Ok(Self {
            settings: SettingsReconciler::new(Arc::clone(&store)),
            config,
            store,
            cache,
            metrics,
            replay,
            subscriber: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &LiveStateCache {
        &self.cache
    }

    /// Start the feed selected by `runtime.mode`.
    pub fn start(&self) -> Result<(), RuntimeError> {
        match self.config.mode {
            FeedMode::Live => self.start_live(),
            FeedMode::Replay => self
                .start_replay_with(|replay| replay.start_configured())
                .map(|_| ()),
        }
    }

    /// Subscribe to the broker topic. A no-op when already subscribed.
    pub fn start_live(&self) -> Result<(), RuntimeError> {
        let mut subscriber = self.subscriber.lock();
        if subscriber.is_some() {
            return Ok(());
        }
        if self.replay.state().is_active() {
            return Err(RuntimeError::validation(
                "cannot subscribe while a replay is running",
            ));
        }
        let handle = BrokerSubscriber::spawn(
            &self.config.broker,
            self.store.keys(),
            self.cache.clone(),
            self.metrics.clone(),
        )?;
        *subscriber = Some(handle);
        Ok(())
    }

    pub fn stop_live(&self) {
        if let Some(handle) = self.subscriber.lock().take() {
            handle.shutdown();
            info!("live feed stopped");
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    pub fn start_replay(&self, path: impl AsRef<Path>) -> Result<StartOutcome, RuntimeError> {
        self.start_replay_with(|replay| replay.start(path))
    }

    /// The subscriber lock is held until the job is started so a concurrent
    /// `start_live` sees it as active.
    fn start_replay_with(
        &self,
        start: impl FnOnce(&ReplayEngine) -> Result<StartOutcome, RuntimeError>,
    ) -> Result<StartOutcome, RuntimeError> {
        let subscriber = self.subscriber.lock();
        if subscriber.is_some() {
            return Err(RuntimeError::validation(
                "cannot replay while the live feed is subscribed",
            ));
        }
        let outcome = start(&self.replay);
        drop(subscriber);
        outcome
    }

    pub fn stop_replay(&self) {
        self.replay.stop();
    }

    /// Block until the running replay finishes.
    pub fn wait_replay(&self) -> Option<ReplaySummary> {
        self.replay.wait()
    }

    #[must_use]
    pub fn replay_state(&self) -> ReplayState {
        self.replay.state()
    }

    #[must_use]
    pub fn last_replay(&self) -> Option<ReplaySummary> {
        self.replay.last_summary()
    }

    #[must_use]
    pub fn snapshot(&self) -> LiveSnapshot {
        self.cache.snapshot()
    }

    #[must_use]
    pub fn metrics(&self) -> FeedStats {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn effective_settings(&self, key: &str) -> EffectiveSettings {
        self.settings.effective_settings(key)
    }

    /// Every catalog channel in layout order with its latest value.
    #[must_use]
    pub fn effective_catalog(&self) -> Vec<ChannelView> {
        let snapshot = self.cache.snapshot();
        self.settings
            .effective_catalog()
            .into_iter()
            .map(|settings| {
                let value = snapshot.value(&settings.key);
                ChannelView::new(settings, value)
            })
            .collect()
    }

    pub fn propose_edit(&self, key: &str, partial: &DraftSetting) {
        self.settings.propose_edit(key, partial);
    }

    pub fn commit(&self, key: &str) -> Result<EffectiveSettings, RuntimeError> {
        self.settings.commit(key)
    }

    pub fn discard(&self, key: &str) -> Option<DraftSetting> {
        self.settings.discard(key)
    }

    /// Stop whichever feed is running.
    pub fn shutdown(&self) {
        self.replay.stop();
        self.stop_live();
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

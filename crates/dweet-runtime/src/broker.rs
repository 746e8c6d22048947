//! MQTT broker plumbing: payload codec, publisher, and the live subscriber.
//!
//! Both directions use one payload shape, a flat JSON object mapping channel
//! key to number, so consumers cannot tell a replayed row from a live one.
//!
//! The subscriber never writes the cache from the broker event loop. Decoded
//! readings are queued to a single ingest thread that owns the writes.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::RuntimeError;
use crate::live::{LiveStateCache, Readings};
use crate::metrics::FeedMetrics;

const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Decode one broker message into readings.
///
/// Fields whose value is neither a number nor numeric text are dropped; the
/// message itself is only rejected when it is not a JSON object.
pub fn decode_payload(payload: &[u8]) -> Result<Readings, PayloadError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(fields) = value else {
        return Err(PayloadError::NotAnObject(json_kind(&value)));
    };
    let mut readings = Readings::with_capacity(fields.len());
    for (key, value) in fields {
        match numeric_value(&value) {
            Some(number) => {
                readings.insert(key, number);
            }
            None => debug!("dropping non-numeric field '{key}' ({})", json_kind(&value)),
        }
    }
    Ok(readings)
}

pub fn encode_payload(readings: &Readings) -> Vec<u8> {
    // A map of string keys to finite floats cannot fail to serialize.
    serde_json::to_vec(readings).unwrap_or_else(|_| b"{}".to_vec())
}

fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outbound side of the broker, used by replay.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RuntimeError>;
}

fn mqtt_options(config: &BrokerConfig, suffix: &str) -> MqttOptions {
    let mut options = MqttOptions::new(
        format!("{}{suffix}", config.client_id),
        config.host.as_str(),
        config.port,
    );
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    options
}

/// Drives a blocking rumqttc connection until shutdown, retrying with
/// exponential backoff on connection errors.
///
/// Shutdown is observed on the outgoing disconnect, so publishes queued
/// before it are still flushed.
struct ConnectionWorker {
    client: Client,
    config: BrokerConfig,
    subscription: Option<Sender<Readings>>,
    metrics: FeedMetrics,
    shutdown: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl ConnectionWorker {
    fn run(self, mut connection: Connection) {
        let mut attempt = 0u32;
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(
                        "connected to broker {}:{}",
                        self.config.host, self.config.port
                    );
                    if attempt > 0 {
                        self.metrics.record_reconnect();
                    }
                    attempt = 0;
                    if self.subscription.is_some() {
                        if let Err(err) = self
                            .client
                            .try_subscribe(self.config.topic.as_str(), QoS::AtMostOnce)
                        {
                            warn!("subscribe to '{}' failed: {err}", self.config.topic);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(queue) = self.subscription.as_ref() else {
                        continue;
                    };
                    if publish.topic != self.config.topic.as_str() {
                        continue;
                    }
                    self.metrics.record_message();
                    match decode_payload(&publish.payload) {
                        Ok(readings) => {
                            debug!("received {} readings on '{}'", readings.len(), publish.topic);
                            if queue.send(readings).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            self.metrics.record_dropped();
                            warn!("dropping message on '{}': {err}", publish.topic);
                        }
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    self.metrics.record_connection_error();
                    let delay =
                        backoff_delay(self.config.reconnect, self.config.reconnect_max, attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "broker {}:{} connection error: {err}; retrying in {} ms",
                        self.config.host,
                        self.config.port,
                        delay.as_millis()
                    );
                    match self.wake.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
        }
        debug!("broker event loop for {} exited", self.config.client_id);
    }
}

/// Client plus the thread polling its connection.
struct BrokerLink {
    client: Client,
    shutdown: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BrokerLink {
    fn spawn(
        config: &BrokerConfig,
        suffix: &str,
        subscription: Option<Sender<Readings>>,
        metrics: FeedMetrics,
    ) -> Result<Self, RuntimeError> {
        let (client, connection) = Client::new(mqtt_options(config, suffix), REQUEST_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let worker = ConnectionWorker {
            client: client.clone(),
            config: config.clone(),
            subscription,
            metrics,
            shutdown: Arc::clone(&shutdown),
            wake: wake_rx,
        };
        let handle = thread::Builder::new()
            .name(format!("dweet-mqtt{suffix}"))
            .spawn(move || worker.run(connection))
            .map_err(|err| RuntimeError::Broker(format!("spawn event loop: {err}").into()))?;
        Ok(Self {
            client,
            shutdown,
            wake: Some(wake_tx),
            worker: Some(handle),
        })
    }

    fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        if let Err(err) = self.client.try_disconnect() {
            debug!("broker disconnect request not queued: {err}");
        }
        self.wake.take();
        if worker.join().is_err() {
            warn!("broker event loop thread panicked");
        }
    }
}

impl Drop for BrokerLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publishes readings onto the broker; used by replay.
///
/// The broker session is opened on the first publish, so a dashboard that
/// never replays never connects a publishing client.
pub struct MqttPublisher {
    config: BrokerConfig,
    metrics: FeedMetrics,
    link: Mutex<Option<BrokerLink>>,
}

impl MqttPublisher {
    #[must_use]
    pub fn new(config: &BrokerConfig, metrics: FeedMetrics) -> Self {
        Self {
            config: config.clone(),
            metrics,
            link: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Flush queued publishes with a disconnect and stop the event loop.
    pub fn close(&self) {
        if let Some(mut link) = self.link.lock().take() {
            link.close();
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RuntimeError> {
        let mut link = self.link.lock();
        if link.is_none() {
            *link = Some(BrokerLink::spawn(
                &self.config,
                "-pub",
                None,
                self.metrics.clone(),
            )?);
            debug!(
                "publisher session opened to {}:{}",
                self.config.host, self.config.port
            );
        }
        let Some(link) = link.as_ref() else {
            return Err(RuntimeError::Broker("publisher not connected".into()));
        };
        link.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| RuntimeError::Broker(format!("publish to '{topic}': {err}").into()))
    }
}

/// Live feed: subscription on one topic feeding the cache.
pub struct BrokerSubscriber;

impl BrokerSubscriber {
    /// Connect, subscribe, and start ingesting into `cache`.
    ///
    /// Only keys in `known` are written to the cache. Returns immediately;
    /// connection failures are retried in the background.
    pub fn spawn(
        config: &BrokerConfig,
        known: HashSet<String>,
        cache: LiveStateCache,
        metrics: FeedMetrics,
    ) -> Result<SubscriberHandle, RuntimeError> {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<Readings>();
        let ingest_metrics = metrics.clone();
        let ingest = thread::Builder::new()
            .name("dweet-ingest".to_string())
            .spawn(move || ingest_loop(&queue_rx, &known, &cache, &ingest_metrics))
            .map_err(|err| RuntimeError::Broker(format!("spawn ingest thread: {err}").into()))?;
        let link = BrokerLink::spawn(config, "-sub", Some(queue_tx), metrics)?;
        info!(
            "subscribing to '{}' on {}:{}",
            config.topic, config.host, config.port
        );
        Ok(SubscriberHandle {
            link,
            ingest: Some(ingest),
        })
    }
}

fn ingest_loop(
    queue: &Receiver<Readings>,
    known: &HashSet<String>,
    cache: &LiveStateCache,
    metrics: &FeedMetrics,
) {
    for mut readings in queue.iter() {
        readings.retain(|key, _| {
            let keep = known.contains(key);
            if !keep {
                debug!("ignoring reading for unknown channel '{key}'");
            }
            keep
        });
        if readings.is_empty() {
            continue;
        }
        cache.update(&readings);
        metrics.record_ingested(readings.len());
    }
}

/// Running live feed. Dropping it shuts the feed down.
pub struct SubscriberHandle {
    link: BrokerLink,
    ingest: Option<JoinHandle<()>>,
}

impl SubscriberHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the link drops the queue sender, which ends the ingest loop.
        self.link.close();
        if let Some(ingest) = self.ingest.take() {
            if ingest.join().is_err() {
                warn!("ingest thread panicked");
            }
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Retry delay after `attempt` consecutive connection failures.
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

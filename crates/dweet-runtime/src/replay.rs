//! Paced replay of a recorded table onto the broker topic.
//!
//! A replay job walks the rows of a CSV export in order, publishes the cells
//! whose column names a catalog channel, mirrors the same readings into the
//! live cache, and waits one interval between rows. At most one job runs per
//! engine. Stopping is cooperative: the row being published finishes, the
//! wait is cut short, and `stop` returns once the job thread has exited.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::broker::{encode_payload, Publisher};
use crate::config::ReplayConfig;
use crate::error::RuntimeError;
use crate::live::{LiveStateCache, Readings};
use crate::metrics::FeedMetrics;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOP_REQUESTED: u8 = 2;
const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    Idle,
    Running,
    StopRequested,
}

impl ReplayState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_RUNNING => Self::Running,
            STATE_STOP_REQUESTED => Self::StopRequested,
            _ => Self::Idle,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
        }
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A job was already active; nothing was started.
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub source: String,
    /// Rows processed before the job ended.
    pub rows: usize,
    pub published: usize,
    pub skipped: usize,
    pub stopped_early: bool,
}

/// Rows of a replay file, parsed up front so a bad file fails `start`.
#[derive(Debug, Clone)]
pub struct ReplayTable {
    columns: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl ReplayTable {
    pub fn load(path: &Path, config: &ReplayConfig) -> Result<Self, RuntimeError> {
        let file = File::open(path).map_err(|err| {
            RuntimeError::ReplayFile(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_reader(file, config.header_rows, config.delimiter).map_err(|err| match err {
            RuntimeError::ReplayFile(message) => {
                RuntimeError::ReplayFile(format!("{}: {message}", path.display()).into())
            }
            other => other,
        })
    }

    /// Parse a table, skipping `header_rows` preamble lines before the header.
    pub fn from_reader<R: Read>(
        reader: R,
        header_rows: usize,
        delimiter: u8,
    ) -> Result<Self, RuntimeError> {
        let mut reader = BufReader::new(reader);
        let mut discard = Vec::new();
        for line in 0..header_rows {
            discard.clear();
            let read = reader.read_until(b'\n', &mut discard).map_err(|err| {
                RuntimeError::ReplayFile(format!("read preamble line {}: {err}", line + 1).into())
            })?;
            if read == 0 {
                return Err(RuntimeError::ReplayFile(
                    format!("file ends inside the {header_rows}-line preamble").into(),
                ));
            }
        }

        let mut csv = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let columns = csv
            .headers()
            .map_err(|err| RuntimeError::ReplayFile(format!("header row: {err}").into()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if columns.iter().all(String::is_empty) {
            return Err(RuntimeError::ReplayFile("missing header row".into()));
        }

        let mut rows = Vec::new();
        for (index, record) in csv.records().enumerate() {
            match record {
                Ok(record) => rows.push(record),
                Err(err) => warn!("skipping unparseable row {}: {err}", index + 1),
            }
        }
        Ok(Self { columns, rows })
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column positions whose header names a known channel.
    #[must_use]
    pub fn matching_columns(&self, known: &HashSet<String>) -> Vec<(usize, String)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, name)| known.contains(name.as_str()))
            .map(|(idx, name)| (idx, name.clone()))
            .collect()
    }

    /// Numeric cells of row `index` in the given columns. Empty or
    /// non-numeric cells are left out.
    #[must_use]
    pub fn extract(&self, index: usize, columns: &[(usize, String)]) -> Readings {
        let mut readings = Readings::new();
        let Some(record) = self.rows.get(index) else {
            return readings;
        };
        for (position, key) in columns {
            let Some(cell) = record.get(*position) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    readings.insert(key.clone(), value);
                }
                _ => debug!("row {}: ignoring non-numeric '{key}' cell '{cell}'", index + 1),
            }
        }
        readings
    }
}

#[derive(Debug, Default)]
struct ReplayShared {
    state: AtomicU8,
    last_summary: Mutex<Option<ReplaySummary>>,
}

impl ReplayShared {
    fn state(&self) -> ReplayState {
        ReplayState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

/// Returns the engine to idle when the job thread exits, panics included.
struct IdleOnExit(Arc<ReplayShared>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.set_state(STATE_IDLE);
    }
}

struct ActiveJob {
    id: u64,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct ReplayJob {
    source: String,
    table: ReplayTable,
    columns: Vec<(usize, String)>,
    topic: SmolStr,
    interval: Duration,
    cache: LiveStateCache,
    publisher: Arc<dyn Publisher>,
    metrics: FeedMetrics,
    shared: Arc<ReplayShared>,
    stop: Receiver<()>,
}

impl ReplayJob {
    fn run(self) {
        let _idle = IdleOnExit(Arc::clone(&self.shared));
        let total = self.table.len();
        let mut summary = ReplaySummary {
            source: self.source.clone(),
            ..ReplaySummary::default()
        };
        info!("replaying {total} rows from {} onto '{}'", self.source, self.topic);

        for index in 0..total {
            if self.shared.state() == ReplayState::StopRequested {
                summary.stopped_early = true;
                break;
            }
            summary.rows += 1;
            let readings = self.table.extract(index, &self.columns);
            if readings.is_empty() {
                summary.skipped += 1;
                self.metrics.record_row_skipped();
                debug!("skipping row {}/{total}: no matching channels", index + 1);
            } else {
                if let Err(err) = self.publisher.publish(&self.topic, encode_payload(&readings)) {
                    self.metrics.record_publish_failure();
                    warn!("row {}/{total}: {err}", index + 1);
                }
                self.cache.update(&readings);
                summary.published += 1;
                self.metrics.record_row_published();
                debug!("published row {}/{total} ({} channels)", index + 1, readings.len());
            }

            if index + 1 == total {
                break;
            }
            match self.stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    summary.stopped_early = true;
                    break;
                }
            }
        }

        if summary.stopped_early {
            info!(
                "replay of {} stopped after {}/{total} rows",
                self.source, summary.rows
            );
        } else {
            info!(
                "finished replay of {}: {} published, {} skipped",
                self.source, summary.published, summary.skipped
            );
        }
        *self.shared.last_summary.lock() = Some(summary);
    }
}

/// Owner of the single replay job.
pub struct ReplayEngine {
    config: ReplayConfig,
    topic: SmolStr,
    known: HashSet<String>,
    cache: LiveStateCache,
    publisher: Arc<dyn Publisher>,
    metrics: FeedMetrics,
    shared: Arc<ReplayShared>,
    slot: Mutex<Option<ActiveJob>>,
    next_job: AtomicU64,
}

impl ReplayEngine {
    pub fn new(
        config: ReplayConfig,
        topic: impl Into<SmolStr>,
        known: HashSet<String>,
        cache: LiveStateCache,
        publisher: Arc<dyn Publisher>,
        metrics: FeedMetrics,
    ) -> Self {
        Self {
            config,
            topic: topic.into(),
            known,
            cache,
            publisher,
            metrics,
            shared: Arc::new(ReplayShared::default()),
            slot: Mutex::new(None),
            next_job: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn state(&self) -> ReplayState {
        self.shared.state()
    }

    #[must_use]
    pub fn last_summary(&self) -> Option<ReplaySummary> {
        self.shared.last_summary.lock().clone()
    }

    /// Start replaying `path` in the background.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without side effects when a job
    /// is active. A missing or unparseable file fails the call and the engine
    /// stays idle.
    pub fn start(&self, path: impl AsRef<Path>) -> Result<StartOutcome, RuntimeError> {
        let path = path.as_ref();
        let mut slot = self.slot.lock();
        if self.state().is_active() {
            info!("replay already running; ignoring start for {}", path.display());
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(finished) = slot.take() {
            reap(finished);
        }

        let table = ReplayTable::load(path, &self.config).inspect_err(|err| {
            error!("replay not started: {err}");
        })?;
        let columns = table.matching_columns(&self.known);
        if columns.is_empty() {
            warn!(
                "{} has no columns matching a catalog channel; every row will be skipped",
                path.display()
            );
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let job = ReplayJob {
            source: path.display().to_string(),
            table,
            columns,
            topic: self.topic.clone(),
            interval: self.config.interval,
            cache: self.cache.clone(),
            publisher: Arc::clone(&self.publisher),
            metrics: self.metrics.clone(),
            shared: Arc::clone(&self.shared),
            stop: stop_rx,
        };
        self.shared.set_state(STATE_RUNNING);
        let handle = match thread::Builder::new()
            .name("dweet-replay".to_string())
            .spawn(move || job.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.set_state(STATE_IDLE);
                return Err(RuntimeError::ReplayFile(
                    format!("spawn replay thread: {err}").into(),
                ));
            }
        };
        *slot = Some(ActiveJob {
            id: self.next_job.fetch_add(1, Ordering::Relaxed),
            stop: stop_tx,
            handle,
        });
        Ok(StartOutcome::Started)
    }

    /// Start the configured replay file.
    pub fn start_configured(&self) -> Result<StartOutcome, RuntimeError> {
        let path: PathBuf = self
            .config
            .file
            .clone()
            .ok_or_else(|| RuntimeError::ReplayFile("no replay file configured".into()))?;
        self.start(path)
    }

    /// Request a stop and wait for the job thread to exit. No publish
    /// happens after this returns. A no-op when idle.
    pub fn stop(&self) {
        let mut slot = self.slot.lock();
        let Some(job) = slot.take() else {
            return;
        };
        if self
            .shared
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOP_REQUESTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!("replay stop requested");
        }
        reap(job);
        self.shared.set_state(STATE_IDLE);
    }

    /// Block until the current job reaches the end of its file (or is
    /// stopped elsewhere), then return the latest summary.
    pub fn wait(&self) -> Option<ReplaySummary> {
        if let Some(id) = self.current_job() {
            self.wait_job(id);
        }
        self.last_summary()
    }

    /// Wait for job `id` to finish and reap it. Returns early once another
    /// job has taken its place, leaving that job running.
    fn wait_job(&self, id: u64) {
        loop {
            {
                let mut slot = self.slot.lock();
                match slot.as_ref() {
                    Some(job) if job.id == id => {
                        if !self.state().is_active() {
                            if let Some(job) = slot.take() {
                                reap(job);
                            }
                            return;
                        }
                    }
                    _ => return,
                }
            }
            thread::sleep(WAIT_POLL);
        }
    }

    fn current_job(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|job| job.id)
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap(job: ActiveJob) {
    let ActiveJob { stop, handle, .. } = job;
    // Disconnecting the stop channel wakes a job waiting between rows.
    drop(stop);
    if handle.join().is_err() {
        warn!("replay thread panicked");
    }
}

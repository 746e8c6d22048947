//! Feed commands: `run` and `replay`.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use dweet_runtime::{
    ChannelView, Dashboard, FeedMode, ReplayState, ReplaySummary, RuntimeConfig, StartOutcome,
};

use crate::{logging, style};

pub fn run_dashboard(
    project: &Path,
    duration_s: Option<u64>,
    refresh_ms: u64,
) -> anyhow::Result<()> {
    let config = RuntimeConfig::load_project(project)?;
    logging::init(&config.log_level);
    let mode = config.mode;
    let dashboard = Dashboard::open(config)?;
    dashboard.start()?;
    println!(
        "{}",
        style::success(format!("Feed started ({})", mode.as_str()))
    );

    let refresh = Duration::from_millis(refresh_ms.max(1));
    let deadline = duration_s.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        thread::sleep(refresh);
        print_views(&dashboard.effective_catalog());
        if mode == FeedMode::Replay && dashboard.replay_state() == ReplayState::Idle {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }
    dashboard.shutdown();
    if let Some(summary) = dashboard.last_replay() {
        print_summary(&summary);
    }
    let stats = dashboard.metrics();
    println!(
        "{}",
        style::dim(format!(
            "messages {} (dropped {}), rows published {} (skipped {}), connection errors {}, reconnects {}",
            stats.messages_received,
            stats.messages_dropped,
            stats.rows_published,
            stats.rows_skipped,
            stats.connection_errors,
            stats.reconnects
        ))
    );
    Ok(())
}

pub fn run_replay(
    project: &Path,
    file: Option<PathBuf>,
    interval_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = RuntimeConfig::load_project(project)?;
    logging::init(&config.log_level);
    if let Some(interval_ms) = interval_ms {
        config.replay.interval = Duration::from_millis(interval_ms.max(1));
    }
    let file = file
        .or_else(|| config.replay.file.clone())
        .context("no replay file; pass --file or set replay.file")?;
    let dashboard = Dashboard::open(config)?;
    match dashboard.start_replay(&file)? {
        StartOutcome::Started => {}
        StartOutcome::AlreadyRunning => anyhow::bail!("replay already running"),
    }
    println!(
        "{}",
        style::success(format!("Replaying {}", file.display()))
    );
    let summary = dashboard.wait_replay();
    dashboard.shutdown();
    if let Some(summary) = summary {
        print_summary(&summary);
    }
    Ok(())
}

fn print_views(views: &[ChannelView]) {
    for view in views {
        println!(
            "{:<16} {:>12.3}  [{} .. {}]  {}",
            view.title, view.value, view.min, view.max, view.kind.as_str()
        );
    }
    println!();
}

fn print_summary(summary: &ReplaySummary) {
    let headline = format!(
        "{}: {} row(s), {} published, {} skipped",
        summary.source, summary.rows, summary.published, summary.skipped
    );
    if summary.stopped_early {
        println!("{}", style::warning(format!("{headline} (stopped early)")));
    } else {
        println!("{}", style::success(headline));
    }
}

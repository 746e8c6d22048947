//! `dweet-runtime` command line.

mod ci;
mod edit;
mod logging;
mod run;
mod show;
mod style;
mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "dweet-runtime")]
#[command(about = "Live and replayed instrument readings for the dweet dashboard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the configured feed and print the dashboard periodically
    Run {
        /// Project folder containing runtime.toml
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Stop after this many seconds
        #[arg(long)]
        duration_s: Option<u64>,
        /// Dashboard print period
        #[arg(long, default_value_t = 1_000)]
        refresh_ms: u64,
    },
    /// Replay a recorded table onto the broker topic until it ends
    Replay {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Table to replay instead of replay.file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Delay between rows instead of replay.interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Print the effective settings of every channel
    Show {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Change one channel's display settings and persist them
    Edit {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Channel key (value_key)
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        min: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        max: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Gauge, Line or Bar
        #[arg(long)]
        kind: Option<String>,
    },
    /// Check runtime.toml and the channel catalog
    Validate {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Replay { .. } => "replay",
            Self::Show { .. } => "show",
            Self::Edit { .. } => "edit",
            Self::Validate { .. } => "validate",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.name();
    if let Err(err) = dispatch(cli.command) {
        eprintln!("{}", style::error(format!("error: {err:#}")));
        std::process::exit(ci::classify_error(&err, Some(command)));
    }
}

fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run {
            project,
            duration_s,
            refresh_ms,
        } => run::run_dashboard(&project, duration_s, refresh_ms),
        Command::Replay {
            project,
            file,
            interval_ms,
        } => run::run_replay(&project, file, interval_ms),
        Command::Show { project, json } => show::run_show(&project, json),
        Command::Edit {
            project,
            key,
            title,
            min,
            max,
            color,
            kind,
        } => edit::run_edit(
            &project,
            &key,
            dweet_runtime::DraftSetting {
                title,
                min,
                max,
                color,
                kind,
            },
        ),
        Command::Validate { project, json } => validate::run_validate(&project, json),
    }
}

//! Effective settings listing.

use std::path::Path;
use std::sync::Arc;

use dweet_runtime::{ConfigStore, RuntimeConfig, SettingsReconciler};

use crate::{logging, style};

pub fn run_show(project: &Path, json: bool) -> anyhow::Result<()> {
    let config = RuntimeConfig::load_project(project)?;
    logging::init(&config.log_level);
    let store = Arc::new(ConfigStore::load(&config.catalog_path)?);
    let settings = SettingsReconciler::new(store);
    let channels = settings.effective_catalog();

    if json {
        println!("{}", serde_json::to_string_pretty(&channels)?);
        return Ok(());
    }
    if channels.is_empty() {
        println!("{}", style::warning("Catalog has no channels"));
        return Ok(());
    }
    println!(
        "{}",
        style::accent(format!(
            "{:<16} {:<24} {:>10} {:>10} {:<12} {}",
            "KEY", "TITLE", "MIN", "MAX", "COLOR", "KIND"
        ))
    );
    for channel in channels {
        println!(
            "{:<16} {:<24} {:>10} {:>10} {:<12} {}",
            channel.key,
            channel.title,
            channel.min,
            channel.max,
            channel.color,
            channel.kind.as_str()
        );
    }
    Ok(())
}

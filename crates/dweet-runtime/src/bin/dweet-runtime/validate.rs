//! Project validation command.

use std::path::Path;

use dweet_runtime::{CatalogLayout, ConfigStore, RuntimeConfig};
use serde_json::json;

use crate::{logging, style};

pub fn run_validate(project: &Path, json: bool) -> anyhow::Result<()> {
    logging::init("warn");
    let config = RuntimeConfig::load_project(project)?;
    let store = ConfigStore::load(&config.catalog_path)?;
    let catalog = store.catalog();
    let layout = match catalog.layout() {
        Some(CatalogLayout::Flat(_)) => "flat",
        Some(CatalogLayout::Grouped(_)) => "grouped",
        None => "none",
    };
    let channels = catalog.channels().count();
    let replay_file = config.replay.file.as_ref().filter(|file| !file.is_file());

    if json {
        let payload = json!({
            "version": 1,
            "command": "validate",
            "status": "ok",
            "project": project.display().to_string(),
            "mode": config.mode.as_str(),
            "catalog": config.catalog_path.display().to_string(),
            "layout": layout,
            "channels": channels,
            "topic": config.broker.topic.as_str(),
            "replay_file_missing": replay_file.map(|file| file.display().to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("{}", style::success("Project ok"));
    println!("Mode: {}", config.mode.as_str());
    println!(
        "Broker: {}:{} topic '{}'",
        config.broker.host, config.broker.port, config.broker.topic
    );
    println!(
        "Catalog: {} ({layout}, {channels} channel(s))",
        config.catalog_path.display()
    );
    if let Some(file) = replay_file {
        println!(
            "{}",
            style::warning(format!("Replay file not found: {}", file.display()))
        );
    }
    Ok(())
}

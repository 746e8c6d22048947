//! One-shot settings edit.

use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use dweet_runtime::{ConfigStore, DraftSetting, RuntimeConfig, SettingsReconciler};

use crate::{logging, style};

pub fn run_edit(project: &Path, key: &str, edit: DraftSetting) -> anyhow::Result<()> {
    if edit.is_empty() {
        bail!("nothing to change; pass --title, --min, --max, --color or --kind");
    }
    let config = RuntimeConfig::load_project(project)?;
    logging::init(&config.log_level);
    let store = Arc::new(ConfigStore::load(&config.catalog_path)?);
    let settings = SettingsReconciler::new(store);
    settings.propose_edit(key, &edit);
    let committed = settings.commit(key)?;
    println!(
        "{}",
        style::success(format!(
            "Saved '{}' to {}",
            committed.key,
            config.catalog_path.display()
        ))
    );
    println!(
        "{} range {}..{} color {} kind {}",
        committed.title,
        committed.min,
        committed.max,
        committed.color,
        committed.kind.as_str()
    );
    Ok(())
}

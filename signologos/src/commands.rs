use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde_json::json;
use signologos_core::training::{export_file_name, samples_per_gesture};
use signologos_core::{AppStore, SettingsPatch};

use crate::cli::SettingsAction;

pub fn status(store: &AppStore) -> Result<()> {
    let state = store.snapshot();
    let report = json!({
        "camera": {
            "status": format!("{:?}", state.camera.status()),
            "device": state.camera.device_id,
            "error": state.camera.error,
        },
        "model": {
            "status": format!("{:?}", state.model.status()),
            "version": state.model.model_version,
            "accuracy": state.model.accuracy,
        },
        "settings": *state.settings,
        "trainingData": {
            "totalSamples": state.training_data.len(),
            "perGesture": samples_per_gesture(&state.training_data),
        },
        "predictionHistory": state.prediction_history.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn settings(store: &AppStore, action: SettingsAction) -> Result<()> {
    let settings = match action {
        SettingsAction::Show => (*store.snapshot().settings).clone(),
        SettingsAction::Set(args) => {
            let patch = SettingsPatch::from(args);
            if patch.is_empty() {
                anyhow::bail!("Nothing to change; pass at least one setting");
            }
            store.update_settings(patch)
        }
        SettingsAction::Reset => store.reset_settings(),
    };
    store.persist().context("Failed to save settings")?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub fn export(store: &AppStore, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(export_file_name(chrono::Local::now().date_naive())));
    let export = store.export_training_data();
    let document = export.to_json().context("Failed to serialize training data")?;
    fs::write(&path, document).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Exported {} samples to {}", export.total_samples, path.display());
    println!("{}", path.display());
    Ok(())
}

pub fn import(store: &AppStore, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = store.import_training_data(&text);
    store.persist().context("Failed to save training data")?;

    println!("Imported {} samples", report.imported);
    for error in &report.errors {
        println!("  skipped: {}", error);
    }
    if report.imported == 0 && !report.is_clean() {
        anyhow::bail!("Nothing imported from {}", path.display());
    }
    Ok(())
}

pub fn clear_training(store: &AppStore) -> Result<()> {
    let removed = store.snapshot().training_data.len();
    store.clear_training_data();
    store.persist().context("Failed to save training data")?;
    println!("Removed {} samples", removed);
    Ok(())
}

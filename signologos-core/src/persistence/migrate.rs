//! Schema migrations for the persisted document.
//!
//! `STEPS[n]` turns a version `n` document into a version `n + 1` document.
//! Each step is total: it accepts any JSON value and never fails.

use serde_json::{Map, Value};

use crate::error::PersistenceError;
use crate::settings::Settings;

pub const CURRENT_VERSION: u64 = 2;

/// Persisted prediction history is capped at this many entries.
pub const PERSISTED_PREDICTIONS: usize = 10;

type Step = fn(Value) -> Value;

const STEPS: [Step; CURRENT_VERSION as usize] = [settings_over_defaults, complete_sample_metadata];

/// Version recorded in `document`; a missing or non-integer version is 0.
pub fn document_version(document: &Value) -> u64 {
    document.get("version").and_then(Value::as_u64).unwrap_or(0)
}

/// Brings `document` up to [`CURRENT_VERSION`].
pub fn migrate(document: Value) -> Result<Value, PersistenceError> {
    let found = document_version(&document);
    if found > CURRENT_VERSION {
        return Err(PersistenceError::Migration {
            found,
            current: CURRENT_VERSION,
        });
    }

    let mut document = document;
    for (from, step) in STEPS.iter().enumerate().skip(found as usize) {
        log::info!("Migrating stored state from version {} to {}", from, from + 1);
        document = step(document);
    }

    if found < CURRENT_VERSION {
        if let Value::Object(map) = &mut document {
            map.insert("version".into(), Value::from(CURRENT_VERSION));
        }
    }
    Ok(document)
}

fn into_object(document: Value) -> Map<String, Value> {
    match document {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// v0 -> v1: stored settings are merged over the defaults.
fn settings_over_defaults(document: Value) -> Value {
    let mut root = into_object(document);

    let mut settings = match serde_json::to_value(Settings::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(Value::Object(stored)) = root.remove("settings") {
        settings.extend(stored);
    }
    root.insert("settings".into(), Value::Object(settings));
    root.insert("version".into(), Value::from(1u64));
    Value::Object(root)
}

/// v1 -> v2: every sample carries `deviceInfo` and an in-range `quality`;
/// the prediction history keeps only its newest entries.
fn complete_sample_metadata(document: Value) -> Value {
    let mut root = into_object(document);

    if let Some(Value::Array(samples)) = root.get_mut("trainingData") {
        for sample in samples.iter_mut() {
            let Value::Object(sample) = sample else {
                continue;
            };
            let metadata = sample
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if !metadata.is_object() {
                *metadata = Value::Object(Map::new());
            }
            if let Value::Object(metadata) = metadata {
                let quality = metadata
                    .get("quality")
                    .and_then(Value::as_f64)
                    .filter(|q| q.is_finite())
                    .map(|q| q.clamp(0.0, 1.0))
                    .unwrap_or(1.0);
                metadata.insert("quality".into(), Value::from(quality));
                if !metadata.get("deviceInfo").is_some_and(Value::is_string) {
                    metadata.insert("deviceInfo".into(), Value::from("unknown"));
                }
            }
        }
    }

    if let Some(Value::Array(history)) = root.get_mut("predictionHistory") {
        let excess = history.len().saturating_sub(PERSISTED_PREDICTIONS);
        history.drain(..excess);
    }

    root.insert("version".into(), Value::from(2u64));
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_version_is_untouched() {
        let document = json!({
            "version": CURRENT_VERSION,
            "settings": { "detectionFPS": 22 },
            "trainingData": [{ "id": "x", "metadata": {} }],
            "predictionHistory": []
        });
        assert_eq!(migrate(document.clone()).unwrap(), document);
    }

    #[test]
    fn migrating_twice_equals_migrating_once() {
        let document = json!({ "settings": { "darkMode": false } });
        let once = migrate(document).unwrap();
        let twice = migrate(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn v0_settings_gain_defaults() {
        let migrated = migrate(json!({ "version": 0, "settings": { "darkMode": false } })).unwrap();
        assert_eq!(migrated["version"], 2);
        assert_eq!(migrated["settings"]["darkMode"], false);
        assert_eq!(migrated["settings"]["detectionFPS"], 15);
        assert_eq!(migrated["settings"]["showLandmarks"], true);
    }

    #[test]
    fn v1_samples_gain_metadata() {
        let history: Vec<Value> = (0..14).map(|i| json!({ "timestamp": i })).collect();
        let migrated = migrate(json!({
            "version": 1,
            "settings": {},
            "trainingData": [
                { "id": "a", "metadata": { "deviceInfo": "phone" } },
                { "id": "b", "metadata": { "quality": 3.0 } },
                { "id": "c" },
                7
            ],
            "predictionHistory": history
        }))
        .unwrap();

        let samples = migrated["trainingData"].as_array().unwrap();
        assert_eq!(samples[0]["metadata"]["quality"], 1.0);
        assert_eq!(samples[0]["metadata"]["deviceInfo"], "phone");
        assert_eq!(samples[1]["metadata"]["quality"], 1.0);
        assert_eq!(samples[1]["metadata"]["deviceInfo"], "unknown");
        assert_eq!(samples[2]["metadata"]["quality"], 1.0);
        assert_eq!(samples[3], 7);

        let history = migrated["predictionHistory"].as_array().unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0]["timestamp"], 4);
    }

    #[test]
    fn newer_version_fails() {
        let err = migrate(json!({ "version": 99 })).unwrap_err();
        assert!(matches!(err, PersistenceError::Migration { found: 99, current: 2 }));
    }

    #[test]
    fn non_object_becomes_default_document() {
        let migrated = migrate(json!([1, 2, 3])).unwrap();
        assert_eq!(migrated["version"], 2);
        assert_eq!(migrated["settings"]["detectionFPS"], 15);
    }
}

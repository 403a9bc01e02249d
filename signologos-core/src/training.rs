//! Training corpus: captured gesture recordings plus export/import documents.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ImportError;
use crate::types::HandLandmark;

pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub device_info: String,
    pub quality: f64,
}

/// One recorded gesture: a sequence of landmark frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSample {
    pub id: String,
    pub gesture_id: String,
    #[serde(default)]
    pub sequence: Vec<Vec<HandLandmark>>,
    pub duration: u64,
    pub timestamp: i64,
    pub metadata: SampleMetadata,
}

impl TrainingSample {
    /// Builds a freshly captured sample with a new unique id.
    pub fn capture(
        gesture_id: &str,
        sequence: Vec<Vec<HandLandmark>>,
        duration_ms: u64,
        device_info: &str,
        quality: f64,
    ) -> Self {
        Self {
            id: format!("training-{}", uuid::Uuid::new_v4().simple()),
            gesture_id: gesture_id.to_string(),
            sequence,
            duration: duration_ms,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: SampleMetadata {
                user_id: None,
                device_info: device_info.to_string(),
                quality: if quality.is_finite() { quality.clamp(0.0, 1.0) } else { 0.0 },
            },
        }
    }
}

/// Export document, `{version, timestamp, trainingData, totalSamples}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingExport {
    pub version: String,
    pub timestamp: i64,
    pub training_data: Vec<TrainingSample>,
    pub total_samples: usize,
}

impl TrainingExport {
    pub fn new(samples: Vec<TrainingSample>) -> Self {
        Self {
            version: EXPORT_FORMAT_VERSION.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            total_samples: samples.len(),
            training_data: samples,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Default file name for an export made on `date`.
pub fn export_file_name(date: chrono::NaiveDate) -> String {
    format!("signologos-training-data-{}.json", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates an import document against the existing corpus.
///
/// Returns the entries to append and a report. A document that is not JSON or
/// has no sample array yields a single error and nothing to append; otherwise
/// each malformed entry is reported by index and skipped.
pub(crate) fn parse_import(text: &str, existing: &[TrainingSample]) -> (Vec<TrainingSample>, ImportReport) {
    let mut report = ImportReport::default();

    let document: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            report.errors.push(ImportError::Unparseable(e.to_string()));
            return (Vec::new(), report);
        }
    };

    let entries = match document
        .get("trainingData")
        .or_else(|| document.get("samples"))
        .and_then(Value::as_array)
    {
        Some(entries) => entries,
        None => {
            report.errors.push(ImportError::MissingSamples);
            return (Vec::new(), report);
        }
    };

    let mut seen: HashSet<String> = existing.iter().map(|s| s.id.clone()).collect();
    let mut accepted = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let sample = match TrainingSample::deserialize(entry) {
            Ok(sample) => sample,
            Err(e) => {
                report.errors.push(ImportError::InvalidEntry {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let quality = sample.metadata.quality;
        if !(0.0..=1.0).contains(&quality) {
            report.errors.push(ImportError::InvalidEntry {
                index,
                reason: format!("quality {} outside [0, 1]", quality),
            });
            continue;
        }

        if !seen.insert(sample.id.clone()) {
            report.errors.push(ImportError::InvalidEntry {
                index,
                reason: format!("duplicate sample id {}", sample.id),
            });
            continue;
        }

        accepted.push(sample);
    }

    report.imported = accepted.len();
    (accepted, report)
}

/// Number of samples recorded per gesture id.
pub fn samples_per_gesture(samples: &[TrainingSample]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.gesture_id.clone()).or_insert(0) += 1;
    }
    counts
}

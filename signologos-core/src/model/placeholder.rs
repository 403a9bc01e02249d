use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use super::{GestureModel, TrainingReport};
use crate::error::ModelError;
use crate::state::lock;
use crate::training::{samples_per_gesture, TrainingSample};
use crate::types::{DetectionResult, GestureScore, DEFAULT_MODEL_VERSION};

const TRAINING_STEPS: u32 = 10;

/// Stand-in engine: loads after a fixed delay and scores gestures without
/// looking at the frames.
///
/// Scores are the fixed set given to [`PlaceholderModel::with_scores`] or,
/// failing that, an even split over the gestures seen in training.
#[derive(Debug)]
pub struct PlaceholderModel {
    load_delay: Duration,
    train_time: Duration,
    accuracy: Option<f64>,
    load_failure: Mutex<Option<String>>,
    scores: Option<Vec<GestureScore>>,
    gestures: Mutex<Vec<String>>,
    loaded: AtomicBool,
    loads: AtomicUsize,
}

impl PlaceholderModel {
    pub fn new(load_delay: Duration) -> Self {
        Self {
            load_delay,
            train_time: Duration::ZERO,
            accuracy: None,
            load_failure: Mutex::new(None),
            scores: None,
            gestures: Mutex::new(Vec::new()),
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_scores(mut self, scores: Vec<GestureScore>) -> Self {
        self.scores = Some(scores);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Total time a training run takes, spread over its progress steps.
    pub fn with_train_time(mut self, train_time: Duration) -> Self {
        self.train_time = train_time;
        self
    }

    pub fn fail_loads_with(&self, reason: Option<&str>) {
        *lock(&self.load_failure) = reason.map(str::to_string);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn known_gestures(&self) -> Vec<String> {
        lock(&self.gestures).clone()
    }
}

#[async_trait]
impl GestureModel for PlaceholderModel {
    fn version(&self) -> String {
        DEFAULT_MODEL_VERSION.to_string()
    }

    async fn load(&self) -> Result<(), ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;

        let failure = lock(&self.load_failure).clone();
        if let Some(reason) = failure {
            return Err(ModelError::LoadFailure(reason));
        }
        self.loaded.store(true, Ordering::SeqCst);
        info!("Placeholder model ready");
        Ok(())
    }

    async fn train(
        &self,
        samples: &[TrainingSample],
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<TrainingReport, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::TrainingFailure("no training samples".to_string()));
        }

        let step = self.train_time / TRAINING_STEPS;
        for done in 1..=TRAINING_STEPS {
            if step.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(step).await;
            }
            progress(f64::from(done) / f64::from(TRAINING_STEPS));
        }

        let gestures: Vec<String> = samples_per_gesture(samples).into_keys().collect();
        debug!("Placeholder model now knows {} gestures", gestures.len());
        *lock(&self.gestures) = gestures;

        Ok(TrainingReport {
            accuracy: self.accuracy,
        })
    }

    async fn infer(&self, _frames: &[DetectionResult]) -> Result<Vec<GestureScore>, ModelError> {
        if !self.is_loaded() {
            return Err(ModelError::NotLoaded);
        }
        if let Some(scores) = &self.scores {
            return Ok(scores.clone());
        }

        let gestures = lock(&self.gestures).clone();
        let even = 1.0 / gestures.len().max(1) as f64;
        Ok(gestures
            .into_iter()
            .map(|gesture_id| GestureScore {
                gesture_id,
                confidence: even,
            })
            .collect())
    }

    fn release(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn load_waits_for_delay() {
        let model = PlaceholderModel::new(Duration::from_millis(2000));
        let started = tokio::time::Instant::now();
        model.load().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(model.is_loaded());
    }

    #[tokio::test]
    async fn training_remembers_gestures_and_scores_evenly() {
        let model = PlaceholderModel::new(Duration::ZERO);
        model.load().await.unwrap();
        let samples = vec![
            TrainingSample::capture("hola", Vec::new(), 1000, "test", 1.0),
            TrainingSample::capture("gracias", Vec::new(), 1000, "test", 1.0),
            TrainingSample::capture("hola", Vec::new(), 1000, "test", 1.0),
        ];
        let reported = Mutex::new(Vec::new());
        model
            .train(&samples, &|p| lock(&reported).push(p))
            .await
            .unwrap();

        assert_eq!(model.known_gestures(), vec!["gracias".to_string(), "hola".to_string()]);
        let reported = lock(&reported).clone();
        assert_eq!(reported.len(), TRAINING_STEPS as usize);
        assert_eq!(reported.last(), Some(&1.0));

        let scores = model.infer(&[]).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| s.confidence == 0.5));
    }

    #[tokio::test]
    async fn inference_needs_load() {
        let model = PlaceholderModel::new(Duration::ZERO);
        assert_eq!(model.infer(&[]).await.unwrap_err(), ModelError::NotLoaded);
    }
}

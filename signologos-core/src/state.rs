//! The state container: one root of `Arc`-shared slices, atomic updates and
//! slice-level change notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::history::HistoryBuffer;
use crate::notifications::Notification;
use crate::settings::Settings;
use crate::training::TrainingSample;
use crate::types::{CameraState, DetectionResult, MediaConstraints, ModelPrediction, ModelState};

/// Full application state. Every field is a separately shared slice; an
/// update replaces only the slices it touches.
#[derive(Debug, Clone)]
pub struct AppState {
    pub camera: Arc<CameraState>,
    pub model: Arc<ModelState>,
    pub detection_results: Arc<HistoryBuffer<DetectionResult>>,
    pub current_prediction: Arc<Option<ModelPrediction>>,
    pub prediction_history: Arc<HistoryBuffer<ModelPrediction>>,
    pub is_loading: Arc<bool>,
    pub notifications: Arc<Vec<Notification>>,
    pub settings: Arc<Settings>,
    pub training_data: Arc<Vec<TrainingSample>>,
}

impl AppState {
    pub fn new(
        constraints: MediaConstraints,
        detection_capacity: usize,
        prediction_capacity: usize,
    ) -> Self {
        Self {
            camera: Arc::new(CameraState::with_constraints(constraints)),
            model: Arc::new(ModelState::default()),
            detection_results: Arc::new(HistoryBuffer::new(detection_capacity)),
            current_prediction: Arc::new(None),
            prediction_history: Arc::new(HistoryBuffer::new(prediction_capacity)),
            is_loading: Arc::new(false),
            notifications: Arc::new(Vec::new()),
            settings: Arc::new(Settings::default()),
            training_data: Arc::new(Vec::new()),
        }
    }

    pub fn camera_mut(&mut self) -> &mut CameraState {
        Arc::make_mut(&mut self.camera)
    }

    pub fn model_mut(&mut self) -> &mut ModelState {
        Arc::make_mut(&mut self.model)
    }

    pub fn detection_results_mut(&mut self) -> &mut HistoryBuffer<DetectionResult> {
        Arc::make_mut(&mut self.detection_results)
    }

    pub fn prediction_history_mut(&mut self) -> &mut HistoryBuffer<ModelPrediction> {
        Arc::make_mut(&mut self.prediction_history)
    }

    pub fn notifications_mut(&mut self) -> &mut Vec<Notification> {
        Arc::make_mut(&mut self.notifications)
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        Arc::make_mut(&mut self.settings)
    }

    pub fn training_data_mut(&mut self) -> &mut Vec<TrainingSample> {
        Arc::make_mut(&mut self.training_data)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            MediaConstraints::default(),
            crate::history::DETECTION_CAPACITY,
            crate::history::PREDICTION_CAPACITY,
        )
    }
}

/// Selector helpers for each slice.
pub mod select {
    use super::*;

    pub fn camera(state: &AppState) -> Arc<CameraState> {
        state.camera.clone()
    }

    pub fn model(state: &AppState) -> Arc<ModelState> {
        state.model.clone()
    }

    pub fn detection_results(state: &AppState) -> Arc<HistoryBuffer<DetectionResult>> {
        state.detection_results.clone()
    }

    pub fn current_prediction(state: &AppState) -> Arc<Option<ModelPrediction>> {
        state.current_prediction.clone()
    }

    pub fn prediction_history(state: &AppState) -> Arc<HistoryBuffer<ModelPrediction>> {
        state.prediction_history.clone()
    }

    pub fn is_loading(state: &AppState) -> Arc<bool> {
        state.is_loading.clone()
    }

    pub fn notifications(state: &AppState) -> Arc<Vec<Notification>> {
        state.notifications.clone()
    }

    pub fn settings(state: &AppState) -> Arc<Settings> {
        state.settings.clone()
    }

    pub fn training_data(state: &AppState) -> Arc<Vec<TrainingSample>> {
        state.training_data.clone()
    }
}

/// A value a subscriber watches. Change is detected by pointer identity.
pub trait Selection: Clone + Send + 'static {
    fn same_as(&self, other: &Self) -> bool;
}

impl<T: Send + Sync + 'static> Selection for Arc<T> {
    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<A: Selection, B: Selection> Selection for (A, B) {
    fn same_as(&self, other: &Self) -> bool {
        self.0.same_as(&other.0) && self.1.same_as(&other.1)
    }
}

impl<A: Selection, B: Selection, C: Selection> Selection for (A, B, C) {
    fn same_as(&self, other: &Self) -> bool {
        self.0.same_as(&other.0) && self.1.same_as(&other.1) && self.2.same_as(&other.2)
    }
}

type Notify = Box<dyn FnOnce() + Send>;
type Check = Box<dyn FnMut(&AppState) -> Option<Notify> + Send>;
type SubscriberList = Vec<(u64, Check)>;

pub struct StateContainer {
    state: Mutex<Arc<AppState>>,
    subscribers: Arc<Mutex<SubscriberList>>,
    next_subscriber: AtomicU64,
}

impl std::fmt::Debug for StateContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

impl StateContainer {
    pub fn new(initial: AppState) -> Self {
        Self {
            state: Mutex::new(Arc::new(initial)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Current snapshot. Cheap: the root and every slice are shared.
    pub fn get(&self) -> Arc<AppState> {
        lock(&self.state).clone()
    }

    /// Applies `mutate` to a copy of the root and publishes it in one step,
    /// then notifies subscribers whose slice changed.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut AppState) -> R) -> R {
        let result = {
            let mut guard = lock(&self.state);
            let mut next = AppState::clone(&guard);
            let result = mutate(&mut next);
            *guard = Arc::new(next);
            result
        };
        self.dispatch();
        result
    }

    /// Calls `callback` with the selected value every time it changes.
    pub fn subscribe<S, Sel, F>(&self, selector: Sel, callback: F) -> Subscription
    where
        S: Selection,
        Sel: Fn(&AppState) -> S + Send + 'static,
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let callback = Arc::new(callback);
        let mut last = selector(&self.get());

        let check: Check = Box::new(move |state: &AppState| {
            let next = selector(state);
            if next.same_as(&last) {
                return None;
            }
            last = next.clone();
            let callback = callback.clone();
            Some(Box::new(move || callback(&next)) as Notify)
        });

        lock(&self.subscribers).push((id, check));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    // Subscribers compare against the state current at dispatch time, so a
    // late dispatch never hands out an older slice after a newer one.
    fn dispatch(&self) {
        let pending: Vec<Notify> = {
            let mut subscribers = lock(&self.subscribers);
            let current = self.get();
            subscribers
                .iter_mut()
                .filter_map(|(_, check)| check(&current))
                .collect()
        };
        for notify in pending {
            notify();
        }
    }
}

/// Unsubscribe handle. Dropping it also unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<SubscriberList>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let removed = {
            let mut list = lock(&subscribers);
            list.iter()
                .position(|(id, _)| *id == self.id)
                .map(|index| list.swap_remove(index))
        };
        drop(removed);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

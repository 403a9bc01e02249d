//! Transient user-facing messages and the timers that expire them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::state::lock;

pub const DEFAULT_DURATION_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// What the presentation layer should do when an action is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Dismiss,
    RetryCamera,
    ReloadModel,
    OpenSettings,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub label: String,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Milliseconds until expiry; 0 keeps it until dismissed.
    pub duration: u64,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

/// A notification as submitted by a caller, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub duration: Option<u64>,
    pub actions: Vec<NotificationAction>,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: &str, message: &str) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.to_string(),
            duration: None,
            actions: Vec::new(),
        }
    }

    pub fn success(title: &str, message: &str) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn error(title: &str, message: &str) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn warning(title: &str, message: &str) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn info(title: &str, message: &str) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration = Some(duration_ms);
        self
    }

    /// Keeps the notification until it is dismissed.
    pub fn persistent(self) -> Self {
        self.with_duration(0)
    }

    pub fn with_action(mut self, label: &str, kind: ActionKind) -> Self {
        self.actions.push(NotificationAction {
            label: label.to_string(),
            kind,
            payload: None,
        });
        self
    }

    pub(crate) fn into_notification(self, id: String, default_duration_ms: u64) -> Notification {
        Notification {
            id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            duration: self.duration.unwrap_or(default_duration_ms),
            actions: self.actions,
        }
    }
}

pub(crate) fn next_notification_id() -> String {
    format!(
        "notification-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Cancellation token for a scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    abort: Option<tokio::task::AbortHandle>,
}

impl TaskHandle {
    /// A handle for a task that was never scheduled.
    pub fn detached() -> Self {
        Self { abort: None }
    }

    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// Runs single-shot tasks after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TaskHandle;
}

/// Schedules onto whichever tokio runtime is current at call time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TaskHandle {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let join = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task();
                });
                TaskHandle {
                    abort: Some(join.abort_handle()),
                }
            }
            Err(_) => {
                warn!("No async runtime available; task scheduled in {:?} will not run", delay);
                TaskHandle::detached()
            }
        }
    }
}

/// Pending expiry tasks keyed by notification id.
#[derive(Debug, Default)]
pub(crate) struct ExpiryTimers {
    pending: Mutex<HashMap<String, TaskHandle>>,
}

impl ExpiryTimers {
    /// Registers the task returned by `schedule` under `id`.
    ///
    /// The map stays locked while the task is scheduled, so a task that fires
    /// immediately and calls [`ExpiryTimers::forget`] waits for the handle to
    /// be recorded first. `schedule` must not run the task inline.
    pub(crate) fn arm(&self, id: String, schedule: impl FnOnce() -> TaskHandle) {
        let mut pending = lock(&self.pending);
        let handle = schedule();
        if let Some(previous) = pending.insert(id, handle) {
            previous.cancel();
        }
    }

    /// Cancels the pending task for `id`, if any.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        match lock(&self.pending).remove(id) {
            Some(handle) => {
                debug!("Cancelled expiry for {}", id);
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets the task for `id` without aborting it (called by the task itself).
    pub(crate) fn forget(&self, id: &str) {
        lock(&self.pending).remove(id);
    }

    pub(crate) fn cancel_all(&self) {
        let drained: Vec<TaskHandle> = lock(&self.pending).drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Drop for ExpiryTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_duration_applies_only_when_unset() {
        let n = NewNotification::error("X", "Y").into_notification("a".into(), DEFAULT_DURATION_MS);
        assert_eq!(n.duration, 5000);

        let n = NewNotification::info("X", "Y")
            .persistent()
            .into_notification("b".into(), DEFAULT_DURATION_MS);
        assert_eq!(n.duration, 0);
    }

    #[test]
    fn ids_are_unique() {
        let a = next_notification_id();
        let b = next_notification_id();
        assert_ne!(a, b);
        assert!(a.starts_with("notification-"));
    }

    #[test]
    fn serializes_type_and_actions() {
        let n = NewNotification::warning("Camera", "Lost")
            .with_action("Retry", ActionKind::RetryCamera)
            .into_notification("n1".into(), 100);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["actions"][0]["kind"], "retryCamera");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = TokioScheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_runs_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _handle = TokioScheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn without_runtime_task_is_detached() {
        let handle = TokioScheduler.schedule(Duration::from_millis(1), Box::new(|| {}));
        assert!(handle.abort.is_none());
    }
}

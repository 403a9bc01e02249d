use std::sync::{Arc, Mutex};
use std::time::Duration;

use signologos_core::notifications::TaskHandle;
use signologos_core::{AppStore, NewNotification, NotificationKind, Scheduler};

type Task = Box<dyn FnOnce() + Send>;

/// Holds tasks until the test fires them; cancellation is a no-op, so a
/// fired task behaves like a timer that raced a manual removal.
#[derive(Default)]
struct ManualScheduler {
    tasks: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    fn fire_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for (_, task) in tasks {
            task();
        }
    }

    fn delays(&self) -> Vec<Duration> {
        self.tasks.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        self.tasks.lock().unwrap().push((delay, task));
        TaskHandle::detached()
    }
}

#[tokio::test(start_paused = true)]
async fn error_notification_expires_at_default_duration() {
    let store = AppStore::builder().build();
    let id = store.add_notification(NewNotification::error("X", "Y"));

    let queued = store.snapshot().notifications.clone();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, NotificationKind::Error);
    assert_eq!(queued[0].duration, 5000);

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(store.snapshot().notifications.iter().any(|n| n.id == id));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.snapshot().notifications.is_empty());
}

#[tokio::test(start_paused = true)]
async fn manual_removal_cancels_expiry() {
    let store = AppStore::builder().build();
    let first = store.add_notification(NewNotification::info("first", "").with_duration(1000));
    assert!(store.remove_notification(&first));
    assert_eq!(store.pending_expiries(), 0);

    let second = store.add_notification(NewNotification::info("second", "").with_duration(3000));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let ids: Vec<String> = store.snapshot().notifications.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![second]);
}

#[test]
fn late_timer_never_removes_another_notification() {
    let scheduler = Arc::new(ManualScheduler::default());
    let store = AppStore::builder().scheduler(scheduler.clone()).build();

    let dismissed = store.add_notification(NewNotification::warning("a", "a"));
    assert!(store.remove_notification(&dismissed));
    let kept = store.add_notification(NewNotification::warning("b", "b").persistent());

    // The dismissed notification's timer fires after the removal.
    scheduler.fire_all();
    let ids: Vec<String> = store.snapshot().notifications.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![kept]);
}

#[test]
fn ids_are_never_reused() {
    let store = AppStore::builder().scheduler(Arc::new(ManualScheduler::default())).build();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..200 {
        let id = store.add_notification(NewNotification::info("t", "m"));
        assert!(store.remove_notification(&id));
        assert!(ids.insert(id));
    }
}

#[test]
fn configured_default_duration_is_applied() {
    let scheduler = Arc::new(ManualScheduler::default());
    let store = AppStore::builder()
        .scheduler(scheduler.clone())
        .default_notification_duration(1200)
        .build();
    store.add_notification(NewNotification::success("ok", "done"));
    store.add_notification(NewNotification::success("ok", "done").with_duration(300));
    store.add_notification(NewNotification::success("ok", "done").persistent());

    assert_eq!(
        scheduler.delays(),
        vec![Duration::from_millis(1200), Duration::from_millis(300)]
    );
    assert_eq!(store.pending_expiries(), 2);

    scheduler.fire_all();
    assert_eq!(store.snapshot().notifications.len(), 1);
    assert_eq!(store.pending_expiries(), 0);
}

#[test]
fn clear_removes_everything() {
    let store = AppStore::builder().scheduler(Arc::new(ManualScheduler::default())).build();
    store.add_notification(NewNotification::info("a", ""));
    store.add_notification(NewNotification::info("b", "").persistent());
    store.clear_notifications();
    assert!(store.snapshot().notifications.is_empty());
    assert_eq!(store.pending_expiries(), 0);
}

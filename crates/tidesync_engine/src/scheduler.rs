//! Restartable one-shot timer driving a single sync task.
//!
//! Each arm spawns a sleeper on the runtime. When it wakes, it detaches
//! itself from the pending slot (so it can no longer be aborted), takes the
//! run lock, and invokes the task with a handle to the scheduler unless a
//! newer arm was made while it waited. The task
//! re-arms itself through that handle. If it returns without re-arming, the
//! scheduler arms at the normal interval.
//!
//! # Invariants
//!
//! - At most one arm is pending; arming replaces and aborts the previous one
//! - Only the newest arm invokes the task; a fire superseded while waiting
//!   for the run lock is dropped
//! - The task is invoked at most once per arm
//! - Two invocations of the task never run concurrently
//! - Nothing is armed or invoked after `stop()` until `start()`

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type TaskFn = dyn Fn(Scheduler) -> TaskFuture + Send + Sync;

/// A periodic timer bound to one task.
///
/// Cloning yields another handle to the same timer.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    name: &'static str,
    interval: Duration,
    task: Box<TaskFn>,
    runtime: Handle,
    stopped: AtomicBool,
    generation: AtomicU64,
    pending: Mutex<Option<PendingArm>>,
    run_lock: tokio::sync::Mutex<()>,
}

struct PendingArm {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Creates a scheduler that runs `task` every `interval`.
    ///
    /// Nothing is armed until [`Scheduler::schedule`] or
    /// [`Scheduler::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Runtime`] when called outside a tokio runtime.
    pub fn new<F, Fut>(name: &'static str, interval: Duration, task: F) -> SyncResult<Self>
    where
        F: Fn(Scheduler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                interval,
                task: Box::new(move |scheduler| Box::pin(task(scheduler))),
                runtime,
                stopped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Returns the scheduler name used in logs.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Returns the normal interval.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Clears a previous stop and arms at the normal interval.
    pub fn start(&self) {
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.schedule();
    }

    /// Arms the task after the normal interval, replacing any pending arm.
    pub fn schedule(&self) {
        self.arm(self.inner.interval);
    }

    /// Arms the task after `delay` instead of the normal interval.
    pub fn reschedule(&self, delay: Duration) {
        self.arm(delay);
    }

    /// Cancels any pending arm and prevents further invocations.
    ///
    /// An invocation already running completes but does not re-arm.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(arm) = self.inner.pending.lock().take() {
            arm.handle.abort();
        }
        debug!(scheduler = self.inner.name, "stopped");
    }

    /// Returns true if [`Scheduler::stop`] was called since the last start.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Returns true if an arm is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    fn arm(&self, delay: Duration) {
        if self.is_stopped() {
            debug!(scheduler = self.inner.name, "not arming, scheduler is stopped");
            return;
        }

        let mut pending = self.inner.pending.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let scheduler = self.clone();
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(generation).await;
        });

        if let Some(previous) = pending.replace(PendingArm { generation, handle }) {
            previous.handle.abort();
        }
        debug!(
            scheduler = self.inner.name,
            delay_ms = delay.as_millis() as u64,
            "armed"
        );
    }

    async fn fire(self, generation: u64) {
        {
            let mut pending = self.inner.pending.lock();
            if pending.as_ref().map(|arm| arm.generation) != Some(generation) {
                return;
            }
            pending.take();
        }

        let _running = self.inner.run_lock.lock().await;
        if self.is_stopped() {
            return;
        }
        // A newer arm was made while this fire waited for the previous run.
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(scheduler = self.inner.name, "skipping superseded fire");
            return;
        }

        let before = self.inner.generation.load(Ordering::SeqCst);
        let task = (self.inner.task)(self.clone());
        if let Err(e) = self.inner.runtime.spawn(task).await {
            if e.is_panic() {
                error!(scheduler = self.inner.name, "sync task panicked");
            }
        }

        let rearmed = self.inner.generation.load(Ordering::SeqCst) != before;
        if !rearmed && !self.is_stopped() {
            self.schedule();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .field("stopped", &self.is_stopped())
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(interval: Duration) -> (Scheduler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = Scheduler::new("test", interval, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        (scheduler, count)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn new_outside_runtime_fails() {
        let result = Scheduler::new("test", Duration::from_secs(1), |_| async {});
        assert!(matches!(result, Err(SyncError::Runtime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_interval() {
        let (scheduler, count) = counting(Duration::from_secs(10));
        scheduler.schedule();
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn rearms_at_interval_when_task_does_not() {
        let (scheduler, count) = counting(Duration::from_secs(5));
        scheduler.schedule();

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_armed());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_replaces_pending_arm() {
        let (scheduler, count) = counting(Duration::from_secs(10));
        scheduler.reschedule(Duration::from_secs(1));
        scheduler.schedule();

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_overrides_interval() {
        let (scheduler, count) = counting(Duration::from_secs(60));
        scheduler.reschedule(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_arm() {
        let (scheduler, count) = counting(Duration::from_secs(1));
        scheduler.schedule();
        scheduler.stop();
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.schedule();
        assert!(!scheduler.is_armed());

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn task_rearm_suppresses_default_rearm() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = Scheduler::new("test", Duration::from_secs(2), move |scheduler| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                scheduler.reschedule(Duration::from_secs(30));
            }
        })
        .unwrap();
        scheduler.schedule();

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The default 2s re-arm would have fired by now.
        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_run_prevents_rearm() {
        let scheduler = Scheduler::new("test", Duration::from_secs(1), move |scheduler| async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            scheduler.schedule();
        })
        .unwrap();
        scheduler.schedule();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn invocations_never_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (r, m) = (Arc::clone(&running), Arc::clone(&max_seen));
        let scheduler = Scheduler::new("test", Duration::from_millis(100), move |_| {
            let (running, max_seen) = (Arc::clone(&r), Arc::clone(&m));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        // Re-arming repeatedly while a run is in flight.
        scheduler.schedule();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            scheduler.reschedule(Duration::from_millis(10));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn fire_superseded_during_run_is_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = Scheduler::new("test", Duration::from_secs(1), move |scheduler| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                scheduler.reschedule(Duration::from_secs(10));
            }
        })
        .unwrap();
        scheduler.schedule();

        // Runs from t=1s to t=3s. This arm fires at 2.5s and queues on the run lock.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        scheduler.schedule();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The task's own 10s backoff, armed at t=3s, still holds.
        tokio::time::sleep(Duration::from_millis(8_900)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_rearmed() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = Scheduler::new("test", Duration::from_secs(1), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("boom");
                }
            }
        })
        .unwrap();
        scheduler.schedule();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }
}

//! Serial task execution seam.
//!
//! All adapter logic runs as tasks on a single-threaded FIFO queue. The
//! [`TaskQueue`] trait abstracts the executor so production code can run on
//! a tokio runtime ([`TokioTaskQueue`]) while tests drive virtual time
//! deterministically ([`crate::testing::SimulatedTaskQueue`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

/// A unit of work posted to a [`TaskQueue`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Single-threaded FIFO executor with immediate and delayed post.
///
/// Implementations must run tasks one at a time. Tasks posted with [`post`]
/// from a single thread execute in post order; delayed tasks sharing a
/// deadline may execute in either order relative to each other, which the
/// cadence logic tolerates via generation-counter cancellation.
///
/// [`post`]: TaskQueue::post
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task for execution as soon as possible.
    fn post(&self, task: Task);

    /// Enqueue a task for execution after `delay`.
    fn post_delayed(&self, task: Task, delay: Duration);
}

/// Production [`TaskQueue`] draining an unbounded channel on a tokio runtime.
///
/// A single spawned consumer executes tasks serially, giving the FIFO
/// guarantee. Delayed posts sleep on their own timer task and then enqueue,
/// so they interleave with immediate posts at expiry rather than jumping the
/// queue. Tasks are expected to be short and non-blocking.
pub struct TokioTaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    handle: Handle,
}

impl TokioTaskQueue {
    /// Create a queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Create a queue on an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self { tx, handle }
    }
}

impl Default for TokioTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for TokioTaskQueue {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!("task posted after queue shutdown, dropped");
        }
    }

    fn post_delayed(&self, task: Task, delay: Duration) {
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                warn!("delayed task expired after queue shutdown, dropped");
            }
        });
    }
}

/// Debug detector for unserialized concurrent entry.
///
/// The adapter's frame entry point may be called from any thread but never
/// from two threads at once. This guard asserts that in debug builds and
/// logs in release.
#[derive(Default)]
pub(crate) struct RaceChecker {
    entered: AtomicBool,
}

impl RaceChecker {
    pub(crate) fn enter(&self) -> RaceGuard<'_> {
        let clashed = self.entered.swap(true, Ordering::AcqRel);
        if clashed {
            debug_assert!(false, "concurrent entry into a serialized section");
            tracing::error!("concurrent entry into a serialized section");
        }
        RaceGuard { checker: self }
    }
}

pub(crate) struct RaceGuard<'a> {
    checker: &'a RaceChecker,
}

impl Drop for RaceGuard<'_> {
    fn drop(&mut self) {
        self.checker.entered.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tasks_run_in_post_order() {
        let queue = TokioTaskQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..8 {
            let log = log.clone();
            queue.post(Box::new(move || log.lock().push(i)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_delayed_task_runs_after_delay() {
        let queue = TokioTaskQueue::new();
        let ran = Arc::new(AtomicU32::new(0));
        let flag = ran.clone();
        queue.post_delayed(
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(30),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_race_guard_releases() {
        let checker = RaceChecker::default();
        {
            let _guard = checker.enter();
        }
        let _guard = checker.enter();
    }
}

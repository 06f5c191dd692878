//! Deterministic test doubles for driving the adapter on virtual time.
//!
//! [`SimulatedClock`] and [`SimulatedTaskQueue`] replace the production
//! clock and executor so tests (and downstream hosts writing their own)
//! can advance time explicitly and observe every scheduled dispatch.
//! [`RecordingSink`] captures deliveries for assertion.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cadence::FrameSink;
use crate::clock::{Clock, Timestamp};
use crate::frame::VideoFrame;
use crate::task_queue::{Task, TaskQueue};

/// Manually advanced monotonic clock.
pub struct SimulatedClock {
    now_us: AtomicI64,
}

impl SimulatedClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now_us: AtomicI64::new(start.as_micros()),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now_us
            .fetch_add(delta.as_micros() as i64, Ordering::SeqCst);
    }

    /// Move the clock forward to `target_us` if it is ahead of now.
    fn advance_to_us(&self, target_us: i64) {
        self.now_us.fetch_max(target_us, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.now_us.load(Ordering::SeqCst))
    }
}

struct ScheduledTask {
    due_us: i64,
    seq: u64,
    task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due_us == other.due_us && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so the max-heap pops the earliest deadline; ties break FIFO.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due_us
            .cmp(&self.due_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct HeapInner {
    next_seq: u64,
    tasks: BinaryHeap<ScheduledTask>,
}

/// Virtual-time [`TaskQueue`].
///
/// Tasks run only when the test advances time; equal deadlines execute in
/// post order. Running a task moves the shared [`SimulatedClock`] to the
/// task's deadline, so code reading the clock inside a task sees the time
/// it was scheduled for.
pub struct SimulatedTaskQueue {
    clock: Arc<SimulatedClock>,
    inner: Mutex<HeapInner>,
}

impl SimulatedTaskQueue {
    /// Create a queue driving (and driven by) `clock`.
    pub fn new(clock: Arc<SimulatedClock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(HeapInner {
                next_seq: 0,
                tasks: BinaryHeap::new(),
            }),
        }
    }

    /// Number of tasks not yet executed.
    pub fn pending(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Run every task due at the current time, including tasks those tasks
    /// post.
    pub fn run_until_idle(&self) {
        self.run_due_through(self.clock.now().as_micros());
    }

    /// Advance virtual time by `delta`, running every task that falls due.
    pub fn advance(&self, delta: Duration) {
        let target_us = self.clock.now().as_micros() + delta.as_micros() as i64;
        self.run_due_through(target_us);
        self.clock.advance_to_us(target_us);
    }

    fn run_due_through(&self, target_us: i64) {
        loop {
            let next = {
                let mut inner = self.inner.lock();
                match inner.tasks.peek() {
                    Some(scheduled) if scheduled.due_us <= target_us => inner.tasks.pop(),
                    _ => None,
                }
            };
            let Some(next) = next else {
                break;
            };
            self.clock.advance_to_us(next.due_us);
            (next.task)();
        }
    }

    fn push(&self, task: Task, due_us: i64) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.push(ScheduledTask { due_us, seq, task });
    }
}

impl TaskQueue for SimulatedTaskQueue {
    fn post(&self, task: Task) {
        self.push(task, self.clock.now().as_micros());
    }

    fn post_delayed(&self, task: Task, delay: Duration) {
        self.push(
            task,
            self.clock.now().as_micros() + delay.as_micros() as i64,
        );
    }
}

/// A frame delivery captured by [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Post time the adapter reported.
    pub post_time: Timestamp,
    /// Backpressure gauge the adapter reported.
    pub frames_scheduled_for_processing: i32,
    /// The delivered frame.
    pub frame: VideoFrame,
}

/// [`FrameSink`] that records every delivery and discard.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
    discards: AtomicU64,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Number of deliveries so far.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// The most recent delivery, if any.
    pub fn last_delivery(&self) -> Option<Delivery> {
        self.deliveries.lock().last().cloned()
    }

    /// Number of discard notifications so far.
    pub fn discard_count(&self) -> u64 {
        self.discards.load(Ordering::SeqCst)
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(
        &self,
        post_time: Timestamp,
        frames_scheduled_for_processing: i32,
        frame: VideoFrame,
    ) {
        self.deliveries.lock().push(Delivery {
            post_time,
            frames_scheduled_for_processing,
            frame,
        });
    }

    fn on_discarded_frame(&self) {
        self.discards.fetch_add(1, Ordering::SeqCst);
    }
}

//! Frame cadence adaptation.
//!
//! [`CadenceAdapter`] sits between a video frame source and an encoder
//! pipeline and regulates the rate and timing at which frames are delivered
//! downstream. It runs in one of two modes:
//!
//! - **Passthrough** forwards every frame immediately and keeps a rolling
//!   estimate of the input frame rate.
//! - **Zero-hertz** imposes a minimum output cadence on a source that may
//!   stop producing frames (a static screen share), repeating the last
//!   frame while the source is idle and slowing the repeats once the
//!   encoder reports quality convergence on every enabled spatial layer.
//!
//! Mode selection is driven by the source's frame-rate constraints, the
//! zero-hertz parameters and a field trial; see
//! [`CadenceAdapter::on_constraints_changed`] and
//! [`CadenceAdapter::set_zero_hertz_params`].
//!
//! Frames may enter from any thread; everything else runs on the adapter's
//! single-threaded task queue. The downstream sink is invoked on that queue
//! and must not call back into the adapter synchronously.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, trace};

use crate::clock::{Clock, Timestamp};
use crate::error::CadenceError;
use crate::field_trial::{FieldTrials, ZERO_HERTZ_SCREENSHARE_TRIAL};
use crate::frame::VideoFrame;
use crate::metrics::{metric_names, MetricsSink};
use crate::task_queue::{RaceChecker, TaskQueue};

mod passthrough;
mod zero_hertz;

use passthrough::PassthroughMode;
use zero_hertz::ZeroHertzMode;

/// Window over which the passthrough input frame rate is averaged.
pub const FRAME_RATE_AVERAGING_WINDOW_MS: i64 = 1000;

/// Repeat period used once all enabled spatial layers have converged.
pub const ZERO_HERTZ_IDLE_REPEAT_PERIOD: Duration = Duration::from_millis(1000);

/// Sink for frames leaving the adapter.
pub trait FrameSink: Send + Sync {
    /// Deliver a frame.
    ///
    /// `post_time` is the adapter's recorded arrival time (or the delivery
    /// time for synthesized repeats); `frames_scheduled_for_processing` is
    /// the number of upstream frames still pending on the adapter's queue,
    /// this one included, so the receiver may decide to drop.
    fn on_frame(
        &self,
        post_time: Timestamp,
        frames_scheduled_for_processing: i32,
        frame: VideoFrame,
    );

    /// The upstream source discarded a frame before it reached the adapter.
    fn on_discarded_frame(&self);
}

/// Parameters for zero-hertz operation. Immutable for the lifetime of an
/// activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroHertzParams {
    /// Number of simulcast layers whose convergence is tracked. At least 1.
    pub num_simulcast_layers: u32,
}

impl Default for ZeroHertzParams {
    fn default() -> Self {
        Self {
            num_simulcast_layers: 1,
        }
    }
}

/// Frame-rate constraints reported by the video source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceConstraints {
    /// Minimum frame rate the source may drop to, if constrained.
    pub min_fps: Option<f64>,
    /// Maximum frame rate the source will produce, if constrained.
    pub max_fps: Option<f64>,
}

/// Counters describing adapter activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceStats {
    /// Frames accepted from the source.
    pub frames_in: u64,
    /// Frames delivered downstream, repeats included.
    pub frames_delivered: u64,
    /// Synthesized repeat deliveries.
    pub repeats_delivered: u64,
    /// Discard notifications forwarded downstream.
    pub frames_discarded: u64,
    /// Mode activations and deactivations.
    pub mode_switches: u64,
}

/// Shared counter storage updated from both modes and the adapter.
#[derive(Default)]
pub(crate) struct SharedStats {
    frames_in: AtomicU64,
    frames_delivered: AtomicU64,
    repeats_delivered: AtomicU64,
    frames_discarded: AtomicU64,
    mode_switches: AtomicU64,
}

impl SharedStats {
    pub(crate) fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_repeat(&self) {
        self.repeats_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mode_switch(&self) {
        self.mode_switches.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CadenceStats {
        CadenceStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            repeats_delivered: self.repeats_delivered.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            mode_switches: self.mode_switches.load(Ordering::Relaxed),
        }
    }
}

/// State confined to the adapter's task queue.
struct AdapterState {
    sink: Option<Arc<dyn FrameSink>>,
    /// Kept alive across mode switches so its rate window stays warm.
    passthrough: Option<PassthroughMode>,
    /// Present exactly while zero-hertz cadence is active.
    zero_hertz: Option<ZeroHertzMode>,
    zero_hertz_params: Option<ZeroHertzParams>,
    source_constraints: Option<SourceConstraints>,
    has_reported_constraint_metrics: bool,
}

struct AdapterInner {
    clock: Arc<dyn Clock>,
    queue: Arc<dyn TaskQueue>,
    metrics: Arc<dyn MetricsSink>,
    /// Field trial, resolved once at construction.
    zero_hertz_screenshare_enabled: bool,
    /// Upstream frames posted to the queue but not yet routed into a mode.
    frames_scheduled_for_processing: AtomicI32,
    incoming_frame_race_checker: RaceChecker,
    stats: Arc<SharedStats>,
    state: Mutex<AdapterState>,
}

/// Top-level frame cadence adapter.
///
/// Construct with [`CadenceAdapter::new`], bind the downstream sink with
/// [`CadenceAdapter::initialize`], then feed frames through
/// [`CadenceAdapter::on_frame`].
pub struct CadenceAdapter {
    inner: Arc<AdapterInner>,
}

impl CadenceAdapter {
    /// Create an adapter on the given clock and task queue.
    ///
    /// The zero-hertz screenshare field trial is consulted here, once.
    pub fn new(
        clock: Arc<dyn Clock>,
        queue: Arc<dyn TaskQueue>,
        field_trials: &dyn FieldTrials,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                clock,
                queue,
                metrics,
                zero_hertz_screenshare_enabled: field_trials
                    .is_enabled(ZERO_HERTZ_SCREENSHARE_TRIAL),
                frames_scheduled_for_processing: AtomicI32::new(0),
                incoming_frame_race_checker: RaceChecker::default(),
                stats: Arc::new(SharedStats::default()),
                state: Mutex::new(AdapterState {
                    sink: None,
                    passthrough: None,
                    zero_hertz: None,
                    zero_hertz_params: None,
                    source_constraints: None,
                    has_reported_constraint_metrics: false,
                }),
            }),
        }
    }

    /// Bind the downstream sink and start in passthrough mode.
    ///
    /// Must be called exactly once, before any frame enters.
    pub fn initialize(&self, sink: Arc<dyn FrameSink>) -> Result<(), CadenceError> {
        let mut state = self.inner.state.lock();
        if state.sink.is_some() {
            return Err(CadenceError::AlreadyInitialized);
        }
        state.passthrough = Some(PassthroughMode::new(
            self.inner.clock.clone(),
            sink.clone(),
            self.inner.stats.clone(),
        ));
        state.sink = Some(sink);
        Ok(())
    }

    /// Enable or disable zero-hertz operation.
    ///
    /// Activation additionally requires zero-hertz-shaped source constraints
    /// and the field trial; see [`CadenceAdapter::on_constraints_changed`].
    /// Call on the task queue.
    pub fn set_zero_hertz_params(&self, params: Option<ZeroHertzParams>) {
        let mut state = self.inner.state.lock();
        let was_enabled = state.zero_hertz_params.is_some();
        if params.is_some() && !was_enabled {
            state.has_reported_constraint_metrics = false;
        }
        state.zero_hertz_params = params;
        self.inner.maybe_reconfigure(&mut state, was_enabled);
    }

    /// Accept a frame from the source. Callable from any thread, but calls
    /// must not overlap.
    pub fn on_frame(&self, frame: VideoFrame) {
        let _race = self.inner.incoming_frame_race_checker.enter();
        let post_time = self.inner.clock.now();
        self.inner
            .frames_scheduled_for_processing
            .fetch_add(1, Ordering::Relaxed);
        self.inner.stats.record_frame_in();
        let weak = Arc::downgrade(&self.inner);
        self.inner.queue.post(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let frames_scheduled = inner
                .frames_scheduled_for_processing
                .fetch_sub(1, Ordering::Relaxed);
            let mut state = inner.state.lock();
            inner.route_frame(&mut state, post_time, frames_scheduled, frame);
            inner.maybe_report_constraint_metrics(&mut state);
        }));
    }

    /// Forward a source-side discard notification downstream.
    pub fn on_discarded_frame(&self) {
        let state = self.inner.state.lock();
        if let Some(sink) = &state.sink {
            sink.on_discarded_frame();
            self.inner.stats.record_discard();
        }
    }

    /// Record updated source constraints and reconfigure the active mode if
    /// the zero-hertz activation conditions changed. Callable from any
    /// thread; the update is applied on the task queue.
    pub fn on_constraints_changed(&self, constraints: SourceConstraints) {
        info!(
            min_fps = ?constraints.min_fps,
            max_fps = ?constraints.max_fps,
            "source constraints changed"
        );
        let weak = Arc::downgrade(&self.inner);
        self.inner.queue.post(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            let was_active = inner.is_zero_hertz_screenshare_enabled(&state);
            state.source_constraints = Some(constraints);
            inner.maybe_reconfigure(&mut state, was_active);
        }));
    }

    /// The active mode's input frame rate: the windowed estimate in
    /// passthrough, the configured target in zero-hertz. Call on the task
    /// queue.
    pub fn input_frame_rate_fps(&self) -> Option<u32> {
        let mut state = self.inner.state.lock();
        if let Some(zero_hertz) = &state.zero_hertz {
            zero_hertz.input_frame_rate_fps()
        } else {
            state
                .passthrough
                .as_mut()
                .and_then(|passthrough| passthrough.input_frame_rate_fps())
        }
    }

    /// Record an input frame arrival into the passthrough rate window.
    ///
    /// Always drives the passthrough estimator, even while zero-hertz is
    /// active, so a later switch back resumes with a warm estimate. Call on
    /// the task queue. Fails with [`CadenceError::NotInitialized`] before
    /// [`CadenceAdapter::initialize`].
    pub fn update_frame_rate(&self) -> Result<(), CadenceError> {
        let mut state = self.inner.state.lock();
        match state.passthrough.as_mut() {
            Some(passthrough) => {
                passthrough.update_frame_rate();
                Ok(())
            }
            None => {
                error!("update_frame_rate before initialize()");
                Err(CadenceError::NotInitialized)
            }
        }
    }

    /// Update a spatial layer's quality convergence. Ignored unless
    /// zero-hertz is active. Call on the task queue.
    pub fn update_layer_quality_convergence(
        &self,
        spatial_index: usize,
        quality_converged: bool,
    ) -> Result<(), CadenceError> {
        let state = self.inner.state.lock();
        match &state.zero_hertz {
            Some(zero_hertz) => {
                zero_hertz.update_layer_quality_convergence(spatial_index, quality_converged)
            }
            None => Ok(()),
        }
    }

    /// Enable or disable a spatial layer. Ignored unless zero-hertz is
    /// active. Call on the task queue.
    pub fn update_layer_status(
        &self,
        spatial_index: usize,
        enabled: bool,
    ) -> Result<(), CadenceError> {
        let state = self.inner.state.lock();
        match &state.zero_hertz {
            Some(zero_hertz) => zero_hertz.update_layer_status(spatial_index, enabled),
            None => Ok(()),
        }
    }

    /// Point-in-time activity counters.
    pub fn stats(&self) -> CadenceStats {
        self.inner.stats.snapshot()
    }
}

impl AdapterInner {
    fn route_frame(
        &self,
        state: &mut AdapterState,
        post_time: Timestamp,
        frames_scheduled: i32,
        frame: VideoFrame,
    ) {
        trace!(?post_time, frames_scheduled, "routing frame");
        if let Some(zero_hertz) = &state.zero_hertz {
            zero_hertz.on_frame(post_time, frames_scheduled, frame);
        } else if let Some(passthrough) = &state.passthrough {
            passthrough.on_frame(post_time, frames_scheduled, frame);
        } else {
            debug_assert!(false, "frame entered before initialize()");
            error!("frame dropped: adapter not initialized");
        }
    }

    /// True when every zero-hertz activation condition holds: field trial,
    /// constraints present with max_fps > 0 and min_fps == 0, and params
    /// set.
    fn is_zero_hertz_screenshare_enabled(&self, state: &AdapterState) -> bool {
        self.zero_hertz_screenshare_enabled
            && state.source_constraints.is_some_and(|constraints| {
                constraints.max_fps.is_some_and(|max| max > 0.0)
                    && constraints.min_fps.is_some_and(|min| min == 0.0)
            })
            && state.zero_hertz_params.is_some()
    }

    /// Create or destroy the zero-hertz mode when the activation state
    /// flipped. Switching reconstructs rather than mutates: a fresh
    /// activation starts with clean cadence state and the current max_fps.
    fn maybe_reconfigure(&self, state: &mut AdapterState, was_zero_hertz_active: bool) {
        let is_zero_hertz_active = self.is_zero_hertz_screenshare_enabled(state);
        if is_zero_hertz_active {
            if !was_zero_hertz_active {
                let (Some(sink), Some(constraints), Some(params)) = (
                    state.sink.clone(),
                    state.source_constraints,
                    state.zero_hertz_params,
                ) else {
                    debug_assert!(false, "zero-hertz activation before initialize()");
                    return;
                };
                let Some(max_fps) = constraints.max_fps else {
                    return;
                };
                state.zero_hertz = Some(ZeroHertzMode::new(
                    self.queue.clone(),
                    self.clock.clone(),
                    sink,
                    max_fps,
                    params,
                    self.stats.clone(),
                ));
                self.stats.record_mode_switch();
                info!(max_fps, "zero-hertz cadence activated");
            }
        } else if was_zero_hertz_active && state.zero_hertz.take().is_some() {
            self.stats.record_mode_switch();
            info!("zero-hertz cadence deactivated");
        }
    }

    /// Emit the constraint-shape counters, at most once per adapter
    /// lifetime and only when zero-hertz params are set.
    fn maybe_report_constraint_metrics(&self, state: &mut AdapterState) {
        if state.has_reported_constraint_metrics {
            return;
        }
        state.has_reported_constraint_metrics = true;
        if state.zero_hertz_params.is_none() {
            return;
        }
        self.metrics.report_boolean(
            metric_names::CONSTRAINTS_EXISTS,
            state.source_constraints.is_some(),
        );
        let Some(constraints) = state.source_constraints else {
            return;
        };
        self.metrics.report_boolean(
            metric_names::CONSTRAINTS_MIN_EXISTS,
            constraints.min_fps.is_some(),
        );
        if let Some(min) = constraints.min_fps {
            self.metrics
                .report_counts_100(metric_names::CONSTRAINTS_MIN_VALUE, min as u32);
        }
        self.metrics.report_boolean(
            metric_names::CONSTRAINTS_MAX_EXISTS,
            constraints.max_fps.is_some(),
        );
        if let Some(max) = constraints.max_fps {
            self.metrics
                .report_counts_100(metric_names::CONSTRAINTS_MAX_VALUE, max as u32);
        }
        match (constraints.min_fps, constraints.max_fps) {
            (None, Some(max)) => {
                self.metrics
                    .report_counts_100(metric_names::CONSTRAINTS_MIN_UNSET_MAX, max as u32);
            }
            (Some(min), Some(max)) => {
                if min < max {
                    self.metrics.report_counts_100(
                        metric_names::CONSTRAINTS_MIN_LESS_THAN_MAX_MIN,
                        min as u32,
                    );
                    self.metrics.report_counts_100(
                        metric_names::CONSTRAINTS_MIN_LESS_THAN_MAX_MAX,
                        max as u32,
                    );
                }
                // Joint min/max distribution; 60 fps is the assumed ceiling
                // for either bound.
                const MAX_BUCKET: u32 = 60 * 60 + 60 - 1;
                self.metrics.report_sparse_enumeration(
                    metric_names::CONSTRAINTS_60_MIN_PLUS_MAX_MINUS_ONE,
                    (min * 60.0 + max - 1.0) as u32,
                    MAX_BUCKET,
                );
            }
            _ => {}
        }
    }
}

//! Passthrough cadence mode.
//!
//! Forwards every incoming frame immediately and keeps a rolling estimate of
//! the input frame rate for the adapter to report.

use std::sync::Arc;

use tracing::trace;

use crate::cadence::{FrameSink, SharedStats, FRAME_RATE_AVERAGING_WINDOW_MS};
use crate::clock::{Clock, Timestamp};
use crate::frame::VideoFrame;
use crate::rate_window::RateWindow;

/// Mode that imposes no cadence of its own.
///
/// Runs entirely on the adapter's task queue.
pub(crate) struct PassthroughMode {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn FrameSink>,
    stats: Arc<SharedStats>,
    input_frame_rate: RateWindow,
}

impl PassthroughMode {
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn FrameSink>,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self {
            clock,
            sink,
            stats,
            input_frame_rate: RateWindow::new(FRAME_RATE_AVERAGING_WINDOW_MS, 1000),
        }
    }

    /// Forward a frame downstream unchanged.
    pub(crate) fn on_frame(
        &self,
        post_time: Timestamp,
        frames_scheduled_for_processing: i32,
        frame: VideoFrame,
    ) {
        trace!(?post_time, frames_scheduled_for_processing, "passthrough dispatch");
        self.sink
            .on_frame(post_time, frames_scheduled_for_processing, frame);
        self.stats.record_delivery();
    }

    /// Estimated input frame rate over the averaging window.
    pub(crate) fn input_frame_rate_fps(&mut self) -> Option<u32> {
        self.input_frame_rate.rate(self.clock.now_ms())
    }

    /// Record one input frame arrival into the rate window.
    pub(crate) fn update_frame_rate(&mut self) {
        self.input_frame_rate.update(1, self.clock.now_ms());
    }
}

//! Windowed frame-rate estimation.
//!
//! Counts arrivals over a trailing time window and scales the count to a
//! per-second rate. Used by the passthrough mode to estimate the input frame
//! rate of a live source.

use std::collections::VecDeque;

/// A single recorded arrival batch.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at_ms: i64,
    count: u32,
}

/// Windowed counter turning arrivals-per-window into a per-second rate.
///
/// `rate` returns `None` until at least two samples sit inside the window,
/// since a single arrival carries no rate information.
#[derive(Debug)]
pub struct RateWindow {
    window_ms: i64,
    scale: u64,
    samples: VecDeque<Sample>,
}

impl RateWindow {
    /// Create an estimator over a `window_ms` trailing window.
    ///
    /// `scale` converts a per-window count into the reported unit; pass
    /// `1000` for frames-per-second when timestamps are in milliseconds.
    pub fn new(window_ms: i64, scale: u64) -> Self {
        debug_assert!(window_ms > 0);
        Self {
            window_ms,
            scale,
            samples: VecDeque::new(),
        }
    }

    /// Record `count` arrivals at `now_ms`.
    pub fn update(&mut self, count: u32, now_ms: i64) {
        self.prune(now_ms);
        self.samples.push_back(Sample { at_ms: now_ms, count });
    }

    /// Estimated rate over the trailing window, or `None` if fewer than two
    /// samples remain inside it.
    pub fn rate(&mut self, now_ms: i64) -> Option<u32> {
        self.prune(now_ms);
        if self.samples.len() < 2 {
            return None;
        }
        let total: u64 = self.samples.iter().map(|s| s.count as u64).sum();
        Some((total * self.scale / self.window_ms as u64) as u32)
    }

    /// Drop samples that have fallen out of the window.
    fn prune(&mut self, now_ms: i64) {
        let horizon = now_ms - self.window_ms;
        while let Some(front) = self.samples.front() {
            if front.at_ms > horizon {
                break;
            }
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_rate() {
        let mut window = RateWindow::new(1000, 1000);
        assert_eq!(window.rate(0), None);
    }

    #[test]
    fn test_single_sample_has_no_rate() {
        let mut window = RateWindow::new(1000, 1000);
        window.update(1, 100);
        assert_eq!(window.rate(100), None);
    }

    #[test]
    fn test_steady_input_rate() {
        let mut window = RateWindow::new(1000, 1000);
        // 10 fps: one frame every 100 ms.
        for i in 0..10 {
            window.update(1, i * 100);
        }
        assert_eq!(window.rate(950), Some(10));
    }

    #[test]
    fn test_rate_decays_as_window_slides() {
        let mut window = RateWindow::new(1000, 1000);
        for i in 0..10 {
            window.update(1, i * 100);
        }
        // Half the samples (t=0..500) age out by t=1500.
        assert_eq!(window.rate(1500), Some(4));
    }

    #[test]
    fn test_rate_disappears_after_idle() {
        let mut window = RateWindow::new(1000, 1000);
        window.update(1, 0);
        window.update(1, 33);
        assert!(window.rate(50).is_some());
        assert_eq!(window.rate(2000), None);
    }

    #[test]
    fn test_batched_counts() {
        let mut window = RateWindow::new(1000, 1000);
        window.update(15, 100);
        window.update(15, 600);
        assert_eq!(window.rate(1000), Some(30));
    }
}

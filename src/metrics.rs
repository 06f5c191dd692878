//! Metrics emission seam and in-process registry.
//!
//! The adapter reports a small fixed set of counters describing the shape of
//! the source's frame-rate constraints. Emission goes through the
//! [`MetricsSink`] trait so hosts can forward samples to their own telemetry
//! backend; [`MetricsRegistry`] is an in-process implementation suitable for
//! tests and for JSON export.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Upper clamp applied to bounded-count samples.
pub const COUNTS_BOUNDARY: u32 = 100;

/// Sink for the adapter's metric emissions.
///
/// Implementations must be cheap; the adapter emits from its task queue.
pub trait MetricsSink: Send + Sync {
    /// Record a boolean sample.
    fn report_boolean(&self, name: &str, value: bool);

    /// Record a bounded count sample. Implementations clamp the value to
    /// [`COUNTS_BOUNDARY`].
    fn report_counts_100(&self, name: &str, value: u32);

    /// Record a sparse enumeration sample in `[0, boundary)`.
    fn report_sparse_enumeration(&self, name: &str, value: u32, boundary: u32);
}

/// Sink that discards every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn report_boolean(&self, _name: &str, _value: bool) {}
    fn report_counts_100(&self, _name: &str, _value: u32) {}
    fn report_sparse_enumeration(&self, _name: &str, _value: u32, _boundary: u32) {}
}

/// In-process [`MetricsSink`] recording every sample.
///
/// Samples are kept per name in arrival order so tests can assert both
/// values and emission counts.
#[derive(Default)]
pub struct MetricsRegistry {
    booleans: RwLock<HashMap<String, Vec<bool>>>,
    counts: RwLock<HashMap<String, Vec<u32>>>,
    enumerations: RwLock<HashMap<String, Vec<u32>>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded boolean samples for `name`.
    pub fn booleans(&self, name: &str) -> Vec<bool> {
        self.booleans.read().get(name).cloned().unwrap_or_default()
    }

    /// Recorded count samples for `name` (post-clamp).
    pub fn counts(&self, name: &str) -> Vec<u32> {
        self.counts.read().get(name).cloned().unwrap_or_default()
    }

    /// Recorded enumeration samples for `name`.
    pub fn enumerations(&self, name: &str) -> Vec<u32> {
        self.enumerations
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of samples recorded under `name` across all kinds.
    pub fn sample_count(&self, name: &str) -> usize {
        self.booleans(name).len() + self.counts(name).len() + self.enumerations(name).len()
    }

    /// Point-in-time copy of everything recorded so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            booleans: self.booleans.read().clone(),
            counts: self.counts.read().clone(),
            enumerations: self.enumerations.read().clone(),
        }
    }

    /// Export all recorded samples as pretty-printed JSON.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl MetricsSink for MetricsRegistry {
    fn report_boolean(&self, name: &str, value: bool) {
        self.booleans
            .write()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn report_counts_100(&self, name: &str, value: u32) {
        self.counts
            .write()
            .entry(name.to_string())
            .or_default()
            .push(value.min(COUNTS_BOUNDARY));
    }

    fn report_sparse_enumeration(&self, name: &str, value: u32, boundary: u32) {
        debug_assert!(value < boundary, "enumeration sample out of range");
        self.enumerations
            .write()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

/// Serializable copy of a [`MetricsRegistry`]'s contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Boolean samples by metric name.
    pub booleans: HashMap<String, Vec<bool>>,
    /// Bounded-count samples by metric name.
    pub counts: HashMap<String, Vec<u32>>,
    /// Sparse enumeration samples by metric name.
    pub enumerations: HashMap<String, Vec<u32>>,
}

pub mod metric_names {
    //! Pre-defined metric names for consistency across the codebase.
    //!
    //! Use these constants instead of string literals when asserting on or
    //! forwarding the adapter's emissions.

    /// Whether source constraints were present at all.
    pub const CONSTRAINTS_EXISTS: &str = "screenshare.frame_rate_constraints.exists";
    /// Whether the min constraint was present.
    pub const CONSTRAINTS_MIN_EXISTS: &str = "screenshare.frame_rate_constraints.min.exists";
    /// Value of the min constraint when present.
    pub const CONSTRAINTS_MIN_VALUE: &str = "screenshare.frame_rate_constraints.min.value";
    /// Whether the max constraint was present.
    pub const CONSTRAINTS_MAX_EXISTS: &str = "screenshare.frame_rate_constraints.max.exists";
    /// Value of the max constraint when present.
    pub const CONSTRAINTS_MAX_VALUE: &str = "screenshare.frame_rate_constraints.max.value";
    /// Max constraint value when min was absent.
    pub const CONSTRAINTS_MIN_UNSET_MAX: &str = "screenshare.frame_rate_constraints.min_unset.max";
    /// Min constraint value when both are present and min < max.
    pub const CONSTRAINTS_MIN_LESS_THAN_MAX_MIN: &str =
        "screenshare.frame_rate_constraints.min_less_than_max.min";
    /// Max constraint value when both are present and min < max.
    pub const CONSTRAINTS_MIN_LESS_THAN_MAX_MAX: &str =
        "screenshare.frame_rate_constraints.min_less_than_max.max";
    /// Composite min/max enumeration, `60 * min + max - 1`.
    pub const CONSTRAINTS_60_MIN_PLUS_MAX_MINUS_ONE: &str =
        "screenshare.frame_rate_constraints.60min_plus_max_minus_one";
}

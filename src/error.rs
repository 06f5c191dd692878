//! Error types for the cadence adapter.

use thiserror::Error;

/// Errors surfaced by [`crate::cadence::CadenceAdapter`] entry points.
///
/// All of these indicate contract misuse by the caller. Runtime conditions
/// such as stale repeats or unconverged layers are normal states and never
/// produce errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CadenceError {
    /// `initialize` was called more than once.
    #[error("cadence adapter is already initialized")]
    AlreadyInitialized,

    /// An operation that requires a bound frame sink ran before `initialize`.
    #[error("cadence adapter is not initialized")]
    NotInitialized,

    /// A spatial layer index exceeded the configured layer count.
    #[error("spatial layer index {index} out of range ({layer_count} layers configured)")]
    InvalidLayerIndex {
        /// The offending index.
        index: usize,
        /// Number of layers the active zero-hertz mode was configured with.
        layer_count: usize,
    },
}

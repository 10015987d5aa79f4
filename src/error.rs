// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-sweep.

/// Errors that can occur while expanding or evaluating a sweep.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Empty or malformed sweep axis (expander only).
    #[error("invalid sweep spec: {0}")]
    InvalidSweepSpec(String),

    /// Negative replicate count (evaluator only).
    #[error("invalid sample count: {name} = {count} (must be >= 0)")]
    InvalidSampleCount {
        /// Which count was rejected (`num_normal` or `num_patched`).
        name: &'static str,
        /// The rejected value.
        count: i64,
    },

    /// The model does not expose the requested activation site.
    #[error("intervention site not found: `{0}`")]
    InterventionSiteNotFound(String),

    /// Opaque failure reported by the model collaborator.
    #[error("model generation failed: {0}")]
    ModelGeneration(String),

    /// Tensor operation error inside a candle backend.
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    /// Hook capture or activation-addition error.
    #[error("hook error: {0}")]
    Hook(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for candle-sweep operations.
pub type Result<T> = std::result::Result<T, SweepError>;

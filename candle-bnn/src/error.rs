//! Error types for variational layer construction and evaluation.

use thiserror::Error;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, BnnError>;

/// Structural faults surfaced while building or evaluating variational layers.
///
/// None of these are transient; they indicate misuse of a layer or a
/// distribution and are returned to the caller immediately.
#[derive(Debug, Error)]
pub enum BnnError {
    /// A distribution's shape does not match the shape the layer expects.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// No closed-form KL[q || p] exists for this pair of distribution kinds.
    #[error("no divergence rule for KL[{q} || {p}]")]
    NoDivergenceRule { q: &'static str, p: &'static str },

    /// Sample layers take (n_samples, batch, dim) inputs only.
    #[error("expected a rank-3 (n_samples, batch, dim) input, got rank {0}")]
    InvalidRank(usize),

    /// Invalid layer or parameter configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Embedding lookup with an index outside [0, n_categories).
    #[error("category index {index} out of range for {n_categories} categories")]
    CategoryOutOfRange { index: i64, n_categories: usize },

    /// Failure inside the tensor backend.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

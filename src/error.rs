//! Error types for trajectory PCA.

use std::error::Error;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
/// Frame sources and alignment primitives report failures through this type.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors raised while fitting, projecting, or scoring a trajectory PCA.
#[derive(Error, Debug)]
pub enum PcaError {
    /// Fewer than two frames were selected; a sample covariance is undefined.
    #[error("At least 2 frames are needed to build a covariance matrix, the selected range yields {n_frames}")]
    InsufficientData { n_frames: usize },

    /// The covariance matrix carries no variance, so explained-variance ratios would be 0/0.
    #[error("Covariance matrix has zero total variance (sum of eigenvalues = {total_variance:e})")]
    DegenerateCovariance { total_variance: f64 },

    /// The projection target does not have the atom count the model was fit on.
    #[error("PCA has been fit for {expected} atoms, the target has {actual} atoms")]
    AtomCountMismatch { expected: usize, actual: usize },

    /// Cosine content requested on a series that is too short or carries no energy.
    #[error("Cannot compute cosine content: {reason}")]
    EmptySeries { reason: String },

    /// An operation needing fitted components was called before `run`.
    #[error("PCA model has not been fit. Call `run` first.")]
    FitRequired,

    /// The model was fit with alignment but no alignment primitive was supplied.
    #[error("PCA model was fit with alignment enabled; an alignment primitive is required")]
    AlignerRequired,

    /// The (start, stop, step) slice cannot be applied to the trajectory.
    #[error("Invalid frame range start={start:?} stop={stop:?} step={step:?} for {n_frames} frames: {reason}")]
    InvalidFrameRange {
        start: Option<usize>,
        stop: Option<usize>,
        step: Option<usize>,
        n_frames: usize,
        reason: &'static str,
    },

    /// Invalid argument or configuration.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The frame source failed to produce a frame.
    #[error("Failed to read frame {frame_index}: {source}")]
    FrameSource {
        frame_index: usize,
        #[source]
        source: ThreadSafeStdError,
    },

    /// The alignment primitive failed on a frame.
    #[error("Alignment failed: {0}")]
    Alignment(#[source] ThreadSafeStdError),

    /// Eigendecomposition or another dense linear algebra step failed.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[source] ThreadSafeStdError),

    /// Saving or loading a fitted model failed.
    #[error("Model persistence error: {0}")]
    Model(String),
}

/// Result type alias for trajectory PCA operations.
pub type Result<T> = std::result::Result<T, PcaError>;

impl PcaError {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an empty series error.
    #[must_use]
    pub fn empty_series(reason: impl Into<String>) -> Self {
        Self::EmptySeries {
            reason: reason.into(),
        }
    }

    /// Create a model persistence error.
    #[must_use]
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}

//! Error types for the estimation engine.
//!
//! Dimension and configuration errors are unrecoverable and fail fast.
//! Numerical singularities are normally recovered locally (PSD repair,
//! PCA-regularized inversion) and only surface as
//! [`EstimationError::SingularCovariance`] when a requested rank cannot be
//! satisfied by the data.

use thiserror::Error;

/// Errors produced by covariance estimation, eigendecomposition, and the
/// CCA/GCCA engines.
#[derive(Debug, Error)]
pub enum EstimationError {
    /// Leading (time) dimensions of jointly processed signals disagree.
    #[error("time dimensions disagree: {left} vs {right} samples")]
    TimeDimensionMismatch {
        /// Sample count of the first operand.
        left: usize,
        /// Sample count of the second operand.
        right: usize,
    },

    /// Channel or filter dimensions of jointly processed arrays disagree.
    #[error("channel dimensions disagree: {left} vs {right}")]
    ChannelDimensionMismatch {
        /// Channel count of the first operand.
        left: usize,
        /// Channel count expected by the second operand.
        right: usize,
    },

    /// A matrix that must be square is not.
    #[error("expected a square matrix, got {rows}x{cols}")]
    NotSquare {
        /// Row count.
        rows: usize,
        /// Column count.
        cols: usize,
    },

    /// A matrix that must be symmetric is not (beyond numerical tolerance).
    #[error("matrix of size {dim}x{dim} is not symmetric (max asymmetry {max_asymmetry:.3e})")]
    NotSymmetric {
        /// Matrix dimension.
        dim: usize,
        /// Largest absolute difference between the matrix and its transpose.
        max_asymmetry: f64,
    },

    /// More components were requested than the data's effective rank supports.
    #[error("requested {requested} components but only {available} are available")]
    RankExceeded {
        /// Number of components/ranks requested.
        requested: usize,
        /// Number actually supported by the data.
        available: usize,
    },

    /// A covariance matrix is numerically singular where an invertible one is
    /// required (e.g. Cholesky whitening of the GCCA whole covariance).
    #[error("covariance matrix is numerically singular (effective rank {rank} of {dim})")]
    SingularCovariance {
        /// Effective rank at the configured tolerance.
        rank: usize,
        /// Matrix dimension.
        dim: usize,
    },

    /// Non-causal FIR design matrices need a center tap, so the lag must be odd.
    #[error("non-causal filters require an odd lag, got {0}")]
    EvenNonCausalLag(usize),

    /// Catch-all for invalid parameter combinations detected at call time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An error reported by the LAPACK-backed linear algebra routines.
    #[error("linear algebra backend error: {0}")]
    Backend(#[from] ndarray_linalg::error::LinalgError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EstimationError>;

//! Configuration for the CCA/GCCA engines, cross-validation, and the
//! permutation significance test.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLOCK_DURATION, DEFAULT_PERMUTATION_TRIALS, DEFAULT_SIGNIFICANCE_PERCENTILE,
};
use crate::covariance::CovarianceKind;

/// Configuration for two-set canonical correlation analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcaConfig {
    /// Number of canonical components to extract.
    pub n_components: usize,

    /// Covariance estimator for the per-block matrices.
    pub covariance: CovarianceKind,

    /// Optional PCA-regularization rank.
    ///
    /// When set, the inverse covariances are restricted to the top
    /// `min(rank_x, rank_y, K)` eigendirections, discarding small
    /// noise-dominated eigenvalues. When `None`, the full effective rank of
    /// each block is used.
    pub regularization_rank: Option<usize>,
}

impl Default for CcaConfig {
    fn default() -> Self {
        Self {
            n_components: 5,
            covariance: CovarianceKind::LedoitWolf,
            regularization_rank: None,
        }
    }
}

/// Configuration for single-modality generalized CCA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GccaConfig {
    /// Number of shared components to extract (smallest generalized
    /// eigenvalues; minimal lambda means maximal shared correlation).
    pub n_components: usize,

    /// Covariance estimator for the whole covariance matrix.
    pub covariance: CovarianceKind,
}

impl Default for GccaConfig {
    fn default() -> Self {
        Self {
            n_components: 5,
            covariance: CovarianceKind::LedoitWolf,
        }
    }
}

/// Configuration for multi-modal generalized CCA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiModalConfig {
    /// Number of shared components to extract.
    pub n_components: usize,

    /// Covariance estimator for the per-block diagonal of the whole
    /// covariance matrix.
    pub covariance: CovarianceKind,

    /// Per-modality weighting coefficients biasing the generalized
    /// eigenproblem. Must have one entry per modality.
    pub rhos: Vec<f64>,

    /// Whether the rho-scaled whole covariance may be treated as symmetric.
    ///
    /// This is a caller-supplied capability flag, not inferred from the data:
    /// only set it when every rho is equal, otherwise the scaled matrix is
    /// asymmetric and the full complex eigensolver is required.
    pub assume_symmetric: bool,
}

impl MultiModalConfig {
    /// Configuration for the given modality weights, with defaults elsewhere.
    pub fn with_rhos(rhos: Vec<f64>) -> Self {
        Self {
            n_components: 5,
            covariance: CovarianceKind::LedoitWolf,
            rhos,
            assume_symmetric: false,
        }
    }
}

/// Configuration for k-fold temporal cross-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValConfig {
    /// Number of contiguous, non-overlapping time folds.
    pub folds: usize,

    /// FIR filter length used to expand stimulus features into a Toeplitz
    /// design matrix before fitting. Typically one second of samples.
    pub lag: usize,

    /// Whether the FIR expansion is causal (past samples only). Non-causal
    /// expansion requires an odd `lag`.
    pub causal: bool,
}

impl Default for CrossValConfig {
    fn default() -> Self {
        Self {
            folds: 10,
            lag: 1,
            causal: true,
        }
    }
}

/// Configuration for the block-shuffle permutation test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermutationConfig {
    /// Number of shuffled trials accumulated into the null distribution.
    pub n_trials: usize,

    /// Duration of one shuffle block in seconds.
    pub block_duration: f64,

    /// Sampling rate of the signals in Hz.
    pub sample_rate: f64,

    /// Number of top components recorded per trial.
    pub top_k: usize,

    /// Percentile of the sorted absolute null correlations reported as the
    /// significance level.
    pub percentile: f64,

    /// Base seed for the per-trial counter-derived RNG streams. The same
    /// seed yields the same null distribution in serial and parallel runs.
    pub seed: u64,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            n_trials: DEFAULT_PERMUTATION_TRIALS,
            block_duration: DEFAULT_BLOCK_DURATION,
            sample_rate: 0.0,
            top_k: 5,
            percentile: DEFAULT_SIGNIFICANCE_PERCENTILE,
            seed: 0,
        }
    }
}

impl PermutationConfig {
    /// Shuffle block length in samples.
    pub fn block_len(&self) -> usize {
        (self.block_duration * self.sample_rate).round() as usize
    }
}

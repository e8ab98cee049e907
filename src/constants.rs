//! Numerical tolerances and default parameters.

/// Relative eigenvalue threshold below which a direction is treated as
/// numerically zero when estimating matrix rank.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Maximum relative asymmetry tolerated before a matrix is rejected as
/// non-symmetric.
pub const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Tolerance for the eigenvalue-agreement check between the two CCA
/// generalized-eigenvalue products.
pub const EIGENVALUE_AGREEMENT_TOLERANCE: f64 = 1e-4;

/// Default number of permutation trials for the null distribution.
pub const DEFAULT_PERMUTATION_TRIALS: usize = 1000;

/// Default shuffle block duration in seconds.
pub const DEFAULT_BLOCK_DURATION: f64 = 0.1;

/// Default percentile at which significance levels are read off the sorted
/// absolute null correlations.
pub const DEFAULT_SIGNIFICANCE_PERCENTILE: f64 = 0.99;

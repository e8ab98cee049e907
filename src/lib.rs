//! # neurocca
//!
//! Canonical correlation analysis for multi-subject neural recordings and
//! stimulus features.
//!
//! The crate covers the full decoding pipeline:
//! - Two-set CCA between a recording and a stimulus design matrix, with
//!   PCA-regularized covariance inversion and per-component p-values
//! - Generalized CCA across many subjects, and a multi-modal variant that
//!   mixes subject stacks with stimulus feature matrices under per-modality
//!   weighting
//! - Ledoit-Wolf shrinkage covariance estimation for short recordings
//! - k-fold temporal cross-validation with per-fold FIR expansion
//! - Block-shuffle permutation testing for correlation significance
//!
//! ## Quick Start
//!
//! ```ignore
//! use neurocca::{cross_validate_cca, CcaConfig, CrossValConfig};
//!
//! // eeg: T x D recording, stimulus: length-T feature series
//! let report = cross_validate_cca(
//!     eeg.view(),
//!     stimulus.view(),
//!     &CcaConfig::default(),
//!     &CrossValConfig::default(),
//! )?;
//!
//! println!("held-out r = {:.3}", report.mean_test[0]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod constants;
mod error;
mod types;

// Functional modules
pub mod cca;
pub mod covariance;
pub mod crossval;
pub mod gcca;
pub mod linalg;
pub mod permutation;
pub mod thread_pool;

// Re-exports for public API
pub use cca::{fit as fit_cca, CcaModel};
pub use config::{CcaConfig, CrossValConfig, GccaConfig, MultiModalConfig, PermutationConfig};
pub use constants::{
    DEFAULT_BLOCK_DURATION, DEFAULT_PERMUTATION_TRIALS, DEFAULT_SIGNIFICANCE_PERCENTILE,
    RANK_TOLERANCE, SYMMETRY_TOLERANCE,
};
pub use covariance::{joint_covariance, CovarianceKind, JointCovariance};
pub use crossval::{
    cross_validate_cca, cross_validate_gcca_multi_modal, rho_sweep, CcaCrossValidation,
    MultiModalCrossValidation, RhoSweep,
};
pub use error::{EstimationError, Result};
pub use gcca::{
    fit as fit_gcca, fit_correlated_components, fit_multi_modal, CorrelatedComponents, GccaModel,
    ModalityWeights, MultiModalModel,
};
pub use linalg::SortOrder;
pub use permutation::{permutation_test_cca, permutation_test_multi_modal, NullDistribution};
pub use types::{ComponentCorrelations, Modality, Signal, SignalStack};

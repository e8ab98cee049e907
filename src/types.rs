//! Type aliases and common types.

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

/// A cleaned, time-major signal: T samples by D channels.
pub type Signal = Array2<f64>;

/// A multi-subject signal stack: T samples by D channels by N subjects.
///
/// The time axis must be aligned and of equal length across all subjects
/// entering a joint computation; trimming is the caller's responsibility.
pub type SignalStack = Array3<f64>;

/// One dataset entering a multi-modal GCCA computation.
///
/// A modality is either a multi-subject EEG-style stack or a single
/// stimulus-feature matrix (e.g. optical flow magnitude, audio envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Modality {
    /// T x D x N stack of per-subject recordings.
    Stack(SignalStack),
    /// T x L matrix of stimulus-derived features, shared by all subjects.
    Features(Signal),
}

impl Modality {
    /// Number of time samples.
    pub fn samples(&self) -> usize {
        match self {
            Modality::Stack(x) => x.dim().0,
            Modality::Features(x) => x.nrows(),
        }
    }

    /// Total column count once the modality is flattened for the joint
    /// eigenproblem (D*N for a stack, L for a feature matrix).
    pub fn flat_width(&self) -> usize {
        match self {
            Modality::Stack(x) => {
                let (_, d, n) = x.dim();
                d * n
            }
            Modality::Features(x) => x.ncols(),
        }
    }

    /// Number of datasets this modality contributes to pairwise correlation
    /// (N for a stack, 1 for a feature matrix).
    pub fn dataset_count(&self) -> usize {
        match self {
            Modality::Stack(x) => x.dim().2,
            Modality::Features(_) => 1,
        }
    }
}

/// Per-component correlation coefficients with their two-sided p-values.
///
/// The null hypothesis for each p-value is that the projected pair is
/// uncorrelated and normally distributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCorrelations {
    /// Pearson correlation per canonical component.
    pub correlations: Array1<f64>,
    /// Two-sided p-value per component.
    pub p_values: Array1<f64>,
}

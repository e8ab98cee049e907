//! k-fold temporal cross-validation and the rho hyperparameter sweep.
//!
//! Folds are contiguous, non-overlapping time slices so train and test sets
//! never interleave at the sample level. The test slice of fold `i` is
//! `[T/k * i, T/k * (i + 1))`; any remainder samples stay in the training
//! set of every fold. FIR expansion of stimulus features happens per fold,
//! after the split, so filter taps never straddle the train/test boundary.

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::cca::{self, CcaModel};
use crate::config::{CcaConfig, CrossValConfig, MultiModalConfig};
use crate::error::{EstimationError, Result};
use crate::gcca::{self, MultiModalModel};
use crate::linalg::{block_hankel, convolution_matrix};
use crate::types::Modality;

/// Start and end (exclusive) of the test slice for one fold.
pub fn fold_bounds(samples: usize, folds: usize, index: usize) -> Result<(usize, usize)> {
    if folds < 2 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "cross-validation requires at least 2 folds, got {folds}"
        )));
    }
    if index >= folds {
        return Err(EstimationError::InvalidConfiguration(format!(
            "fold index {index} out of range for {folds} folds"
        )));
    }
    let len_test = samples / folds;
    if len_test == 0 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "{samples} samples cannot be split into {folds} folds"
        )));
    }
    Ok((len_test * index, len_test * (index + 1)))
}

fn join_rows2<'a>(before: ArrayView2<'a, f64>, after: ArrayView2<'a, f64>) -> Result<Array2<f64>> {
    concatenate(Axis(0), &[before, after]).map_err(|e| {
        EstimationError::InvalidConfiguration(format!("fold concatenation failed: {e}"))
    })
}

/// Split a T x D signal into `(train, test)` for one fold.
pub fn split_signal(
    x: ArrayView2<f64>,
    folds: usize,
    index: usize,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let (start, end) = fold_bounds(x.nrows(), folds, index)?;
    let train = join_rows2(x.slice(s![..start, ..]), x.slice(s![end.., ..]))?;
    Ok((train, x.slice(s![start..end, ..]).to_owned()))
}

/// Split a T x D x N stack into `(train, test)` for one fold.
pub fn split_stack(
    x: ArrayView3<f64>,
    folds: usize,
    index: usize,
) -> Result<(ndarray::Array3<f64>, ndarray::Array3<f64>)> {
    let (start, end) = fold_bounds(x.dim().0, folds, index)?;
    let train = concatenate(
        Axis(0),
        &[x.slice(s![..start, .., ..]), x.slice(s![end.., .., ..])],
    )
    .map_err(|e| {
        EstimationError::InvalidConfiguration(format!("fold concatenation failed: {e}"))
    })?;
    Ok((train, x.slice(s![start..end, .., ..]).to_owned()))
}

/// Split a length-T series into `(train, test)` for one fold.
pub fn split_series(
    x: ArrayView1<f64>,
    folds: usize,
    index: usize,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let (start, end) = fold_bounds(x.len(), folds, index)?;
    let train = concatenate(Axis(0), &[x.slice(s![..start]), x.slice(s![end..])]).map_err(|e| {
        EstimationError::InvalidConfiguration(format!("fold concatenation failed: {e}"))
    })?;
    Ok((train, x.slice(s![start..end]).to_owned()))
}

/// Split a modality into `(train, test)` for one fold, preserving its kind.
pub fn split_modality(
    modality: &Modality,
    folds: usize,
    index: usize,
) -> Result<(Modality, Modality)> {
    match modality {
        Modality::Stack(x) => {
            let (train, test) = split_stack(x.view(), folds, index)?;
            Ok((Modality::Stack(train), Modality::Stack(test)))
        }
        Modality::Features(x) => {
            let (train, test) = split_signal(x.view(), folds, index)?;
            Ok((Modality::Features(train), Modality::Features(test)))
        }
    }
}

/// A degenerate fold or component count would otherwise only surface as a
/// skipped fold loop and NaN means; reject it before any work happens.
fn validate_run(folds: usize, n_components: usize) -> Result<()> {
    if folds < 2 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "cross-validation requires at least 2 folds, got {folds}"
        )));
    }
    if n_components == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "n_components must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Result of cross-validating a two-set CCA decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcaCrossValidation {
    /// Training correlations, one row per fold.
    pub train_correlations: Array2<f64>,
    /// Held-out correlations, one row per fold.
    pub test_correlations: Array2<f64>,
    /// Mean training correlation per component.
    pub mean_train: Array1<f64>,
    /// Mean held-out correlation per component.
    pub mean_test: Array1<f64>,
    /// Model refitted on the full recording.
    pub final_model: CcaModel,
}

/// Cross-validate CCA between a multi-channel recording and a single
/// stimulus feature series.
///
/// The stimulus is expanded into a `lag`-tap FIR design matrix per fold
/// before fitting, so a component correlates the recording with a learned
/// temporal filter of the stimulus rather than with its instantaneous value.
pub fn cross_validate_cca(
    eeg: ArrayView2<f64>,
    stimulus: ArrayView1<f64>,
    cca: &CcaConfig,
    cv: &CrossValConfig,
) -> Result<CcaCrossValidation> {
    validate_run(cv.folds, cca.n_components)?;
    if eeg.nrows() != stimulus.len() {
        return Err(EstimationError::TimeDimensionMismatch {
            left: eeg.nrows(),
            right: stimulus.len(),
        });
    }
    let k = cca.n_components;
    let mut train_correlations = Array2::zeros((cv.folds, k));
    let mut test_correlations = Array2::zeros((cv.folds, k));

    for fold in 0..cv.folds {
        let (eeg_train, eeg_test) = split_signal(eeg, cv.folds, fold)?;
        let (stim_train, stim_test) = split_series(stimulus, cv.folds, fold)?;
        let design_train = convolution_matrix(cv.lag, stim_train.view(), cv.causal)?;
        let design_test = convolution_matrix(cv.lag, stim_test.view(), cv.causal)?;

        let model = cca::fit(eeg_train.view(), design_train.view(), cca)?;
        train_correlations
            .row_mut(fold)
            .assign(&model.train.correlations);
        let scored = model.apply(eeg_test.view(), design_test.view())?;
        test_correlations.row_mut(fold).assign(&scored.correlations);
    }

    let folds_f = cv.folds as f64;
    let mean_train = train_correlations.sum_axis(Axis(0)) / folds_f;
    let mean_test = test_correlations.sum_axis(Axis(0)) / folds_f;
    log::info!(
        "CCA cross-validation: {} folds, mean held-out r[0] = {:.4}",
        cv.folds,
        mean_test[0]
    );

    let full_design = convolution_matrix(cv.lag, stimulus, cv.causal)?;
    let final_model = cca::fit(eeg, full_design.view(), cca)?;

    Ok(CcaCrossValidation {
        train_correlations,
        test_correlations,
        mean_train,
        mean_test,
        final_model,
    })
}

/// Result of cross-validating a multi-modal GCCA fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiModalCrossValidation {
    /// Training average pairwise correlations, one row per fold.
    pub train_correlations: Array2<f64>,
    /// Held-out average pairwise correlations, one row per fold.
    pub test_correlations: Array2<f64>,
    /// Mean training correlation per component.
    pub mean_train: Array1<f64>,
    /// Mean held-out correlation per component.
    pub mean_test: Array1<f64>,
    /// Model refitted on the full recording.
    pub final_model: MultiModalModel,
}

/// Expand feature modalities into their FIR design form; stacks pass
/// through unchanged.
fn expand_modality(modality: &Modality, cv: &CrossValConfig) -> Result<Modality> {
    match modality {
        Modality::Stack(_) => Ok(modality.clone()),
        Modality::Features(f) => {
            if cv.lag <= 1 {
                return Ok(modality.clone());
            }
            Ok(Modality::Features(block_hankel(f.view(), cv.lag, cv.causal)?))
        }
    }
}

/// Cross-validate multi-modal GCCA over heterogeneous datasets.
pub fn cross_validate_gcca_multi_modal(
    modalities: &[Modality],
    mm: &MultiModalConfig,
    cv: &CrossValConfig,
) -> Result<MultiModalCrossValidation> {
    validate_run(cv.folds, mm.n_components)?;
    let k = mm.n_components;
    let mut train_correlations = Array2::zeros((cv.folds, k));
    let mut test_correlations = Array2::zeros((cv.folds, k));

    for fold in 0..cv.folds {
        let mut train = Vec::with_capacity(modalities.len());
        let mut test = Vec::with_capacity(modalities.len());
        for modality in modalities {
            let (tr, te) = split_modality(modality, cv.folds, fold)?;
            train.push(expand_modality(&tr, cv)?);
            test.push(expand_modality(&te, cv)?);
        }
        let model = gcca::fit_multi_modal(&train, mm)?;
        train_correlations.row_mut(fold).assign(&model.apply(&train)?);
        test_correlations.row_mut(fold).assign(&model.apply(&test)?);
    }

    let folds_f = cv.folds as f64;
    let mean_train = train_correlations.sum_axis(Axis(0)) / folds_f;
    let mean_test = test_correlations.sum_axis(Axis(0)) / folds_f;
    log::info!(
        "multi-modal GCCA cross-validation: {} folds, mean held-out r[0] = {:.4}",
        cv.folds,
        mean_test[0]
    );

    let expanded: Vec<Modality> = modalities
        .iter()
        .map(|m| expand_modality(m, cv))
        .collect::<Result<_>>()?;
    let final_model = gcca::fit_multi_modal(&expanded, mm)?;

    Ok(MultiModalCrossValidation {
        train_correlations,
        test_correlations,
        mean_train,
        mean_test,
        final_model,
    })
}

/// Result of a rho hyperparameter sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RhoSweep {
    /// Candidate exponents in sweep order.
    pub exponents: Vec<f64>,
    /// Mean held-out first-component correlation per candidate.
    pub scores: Vec<f64>,
    /// The winning rho vector: 1 for the first modality, `10^e` elsewhere.
    pub best_rhos: Vec<f64>,
    /// The winning held-out score.
    pub best_score: f64,
}

/// Sweep the modality weighting coefficient over `10^e` for each candidate
/// exponent, scoring by mean held-out first-component correlation.
///
/// The first modality's rho is pinned to 1 (only relative weights matter);
/// every other modality receives the candidate value.
pub fn rho_sweep(
    modalities: &[Modality],
    exponents: &[f64],
    mm: &MultiModalConfig,
    cv: &CrossValConfig,
) -> Result<RhoSweep> {
    if exponents.is_empty() {
        return Err(EstimationError::InvalidConfiguration(
            "rho sweep requires at least one candidate exponent".into(),
        ));
    }
    let mut scores = Vec::with_capacity(exponents.len());
    let mut best_score = f64::NEG_INFINITY;
    let mut best_rhos = Vec::new();
    for &e in exponents {
        let rho = 10f64.powf(e);
        let mut rhos = vec![rho; modalities.len()];
        rhos[0] = 1.0;
        let candidate = MultiModalConfig {
            rhos: rhos.clone(),
            // Non-uniform rhos break the symmetry of the scaled covariance.
            assume_symmetric: false,
            ..mm.clone()
        };
        let report = cross_validate_gcca_multi_modal(modalities, &candidate, cv)?;
        let score = report.mean_test[0];
        log::debug!("rho sweep: 10^{e} -> held-out r[0] = {score:.4}");
        scores.push(score);
        if score > best_score {
            best_score = score;
            best_rhos = rhos;
        }
    }
    Ok(RhoSweep {
        exponents: exponents.to_vec(),
        scores,
        best_rhos,
        best_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::CovarianceKind;
    use ndarray::{Array2, Array3};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_fold_bounds_cover_disjoint_slices() {
        for &folds in &[2usize, 5, 10] {
            let samples = 103;
            let len_test = samples / folds;
            let mut covered = vec![false; len_test * folds];
            for i in 0..folds {
                let (start, end) = fold_bounds(samples, folds, i).unwrap();
                assert_eq!(end - start, len_test);
                for flag in &mut covered[start..end] {
                    assert!(!*flag, "fold slices must not overlap");
                    *flag = true;
                }
            }
            assert!(covered.iter().all(|&c| c));
        }
    }

    #[test]
    fn test_fold_bounds_rejects_bad_configs() {
        assert!(fold_bounds(100, 1, 0).is_err());
        assert!(fold_bounds(100, 5, 5).is_err());
        assert!(fold_bounds(3, 5, 0).is_err());
    }

    #[test]
    fn test_split_keeps_remainder_in_train() {
        let x = Array2::from_shape_fn((103, 2), |(i, j)| (i * 2 + j) as f64);
        let (train, test) = split_signal(x.view(), 10, 3).unwrap();
        assert_eq!(test.nrows(), 10);
        assert_eq!(train.nrows(), 93);
        // Test slice is rows [30, 40).
        assert_eq!(test[(0, 0)], 60.0);
        // Train resumes at row 40 after its first 30 rows.
        assert_eq!(train[(30, 0)], 80.0);
    }

    #[test]
    fn test_split_stack_shapes() {
        let x = Array3::<f64>::zeros((100, 4, 3));
        let (train, test) = split_stack(x.view(), 5, 0).unwrap();
        assert_eq!(train.dim(), (80, 4, 3));
        assert_eq!(test.dim(), (20, 4, 3));
    }

    fn correlated_recording(t: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let stimulus = Array1::from_shape_fn(t, |_| rng.random_range(-1.0..1.0));
        let eeg = Array2::from_shape_fn((t, 3), |(i, ch)| {
            stimulus[i] * (1.0 + 0.2 * ch as f64) + 0.5 * rng.random_range(-1.0..1.0)
        });
        (eeg, stimulus)
    }

    #[test]
    fn test_cross_validate_cca_generalizes() {
        let (eeg, stimulus) = correlated_recording(1000, 11);
        let cca = CcaConfig {
            n_components: 1,
            covariance: CovarianceKind::LedoitWolf,
            regularization_rank: None,
        };
        let cv = CrossValConfig {
            folds: 5,
            lag: 3,
            causal: true,
        };
        let report = cross_validate_cca(eeg.view(), stimulus.view(), &cca, &cv).unwrap();
        assert_eq!(report.train_correlations.dim(), (5, 1));
        assert_eq!(report.test_correlations.dim(), (5, 1));
        assert!(
            report.mean_test[0] > 0.3,
            "held-out correlation should survive, got {}",
            report.mean_test[0]
        );
        assert!(report.mean_train[0] >= report.mean_test[0] - 0.1);
    }

    fn correlated_modalities(t: usize, seed: u64) -> Vec<Modality> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let latent: Vec<f64> = (0..t).map(|_| rng.random_range(-1.0..1.0)).collect();
        let stack = Array3::from_shape_fn((t, 2, 3), |(i, _, _)| {
            latent[i] + 0.4 * rng.random_range(-1.0..1.0)
        });
        let features = Array2::from_shape_fn((t, 1), |(i, _)| {
            latent[i] + 0.4 * rng.random_range(-1.0..1.0)
        });
        vec![Modality::Stack(stack), Modality::Features(features)]
    }

    #[test]
    fn test_cross_validate_multi_modal() {
        let modalities = correlated_modalities(600, 21);
        let mm = MultiModalConfig {
            n_components: 1,
            covariance: CovarianceKind::LedoitWolf,
            rhos: vec![1.0, 1.0],
            assume_symmetric: false,
        };
        let cv = CrossValConfig {
            folds: 3,
            lag: 1,
            causal: true,
        };
        let report = cross_validate_gcca_multi_modal(&modalities, &mm, &cv).unwrap();
        assert_eq!(report.test_correlations.dim(), (3, 1));
        assert!(
            report.mean_test[0] > 0.3,
            "held-out shared correlation should survive, got {}",
            report.mean_test[0]
        );
    }

    #[test]
    fn test_cross_validate_cca_rejects_degenerate_configs() {
        let (eeg, stimulus) = correlated_recording(100, 41);
        let cca = CcaConfig {
            n_components: 1,
            covariance: CovarianceKind::LedoitWolf,
            regularization_rank: None,
        };
        // Too few folds must fail before any fold runs, not return NaN means.
        for folds in [0, 1] {
            let cv = CrossValConfig {
                folds,
                lag: 1,
                causal: true,
            };
            assert!(matches!(
                cross_validate_cca(eeg.view(), stimulus.view(), &cca, &cv),
                Err(EstimationError::InvalidConfiguration(_))
            ));
        }
        let no_components = CcaConfig {
            n_components: 0,
            ..cca
        };
        let cv = CrossValConfig {
            folds: 2,
            lag: 1,
            causal: true,
        };
        assert!(matches!(
            cross_validate_cca(eeg.view(), stimulus.view(), &no_components, &cv),
            Err(EstimationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_cross_validate_multi_modal_rejects_degenerate_configs() {
        let modalities = correlated_modalities(100, 42);
        let mm = MultiModalConfig {
            n_components: 0,
            covariance: CovarianceKind::LedoitWolf,
            rhos: vec![1.0, 1.0],
            assume_symmetric: false,
        };
        let cv = CrossValConfig {
            folds: 2,
            lag: 1,
            causal: true,
        };
        assert!(matches!(
            cross_validate_gcca_multi_modal(&modalities, &mm, &cv),
            Err(EstimationError::InvalidConfiguration(_))
        ));
        let mm = MultiModalConfig {
            n_components: 1,
            ..mm
        };
        let zero_folds = CrossValConfig { folds: 0, ..cv };
        assert!(matches!(
            cross_validate_gcca_multi_modal(&modalities, &mm, &zero_folds),
            Err(EstimationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rho_sweep_picks_best_candidate() {
        let modalities = correlated_modalities(400, 31);
        let mm = MultiModalConfig {
            n_components: 1,
            covariance: CovarianceKind::LedoitWolf,
            rhos: vec![1.0, 1.0],
            assume_symmetric: false,
        };
        let cv = CrossValConfig {
            folds: 2,
            lag: 1,
            causal: true,
        };
        let sweep = rho_sweep(&modalities, &[-1.0, 0.0, 1.0], &mm, &cv).unwrap();
        assert_eq!(sweep.scores.len(), 3);
        let max = sweep.scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(sweep.best_score, max);
        assert_eq!(sweep.best_rhos[0], 1.0);
    }
}

//! End-to-end tests of the decoding pipeline on synthetic recordings.
//!
//! Each test builds a recording whose channels carry a known stimulus-locked
//! component plus noise, then checks that the pipeline recovers it: CCA finds
//! the correlation, cross-validation shows it generalizes, GCCA finds it
//! shared across subjects, and the permutation test separates it from the
//! shuffled null.

use ndarray::{Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use neurocca::linalg::convolution_matrix;
use neurocca::{
    cross_validate_cca, fit_cca, fit_gcca, fit_multi_modal, permutation_test_cca, CcaConfig,
    CovarianceKind, CrossValConfig, GccaConfig, Modality, MultiModalConfig, PermutationConfig,
};

/// A stimulus series and a recording whose first channel follows it.
fn synthetic_recording(t: usize, noise: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let stimulus = Array1::from_shape_fn(t, |_| rng.random_range(-1.0..1.0));
    let eeg = Array2::from_shape_fn((t, 2), |(i, ch)| {
        if ch == 0 {
            stimulus[i] + noise * rng.random_range(-1.0..1.0)
        } else {
            rng.random_range(-1.0..1.0)
        }
    });
    (eeg, stimulus)
}

#[test]
fn cca_recovers_stimulus_locked_component() {
    let (eeg, stimulus) = synthetic_recording(1000, 0.3, 1);
    let design = convolution_matrix(1, stimulus.view(), true).unwrap();
    let config = CcaConfig {
        n_components: 1,
        covariance: CovarianceKind::LedoitWolf,
        regularization_rank: None,
    };
    let model = fit_cca(eeg.view(), design.view(), &config).unwrap();
    assert!(
        model.train.correlations[0] > 0.5,
        "expected a strong canonical correlation, got {}",
        model.train.correlations[0]
    );
    assert!(model.train.p_values[0] < 1e-6);
}

#[test]
fn cca_finds_nothing_in_misaligned_data() {
    let (eeg, stimulus) = synthetic_recording(1000, 0.3, 2);
    // Reverse the stimulus in time; the alignment is gone.
    let reversed = Array1::from_shape_fn(stimulus.len(), |i| stimulus[stimulus.len() - 1 - i]);
    let design = convolution_matrix(1, reversed.view(), true).unwrap();
    let config = CcaConfig {
        n_components: 1,
        covariance: CovarianceKind::LedoitWolf,
        regularization_rank: None,
    };
    let model = fit_cca(eeg.view(), design.view(), &config).unwrap();
    assert!(
        model.train.correlations[0] < 0.1,
        "misaligned data should not correlate, got {}",
        model.train.correlations[0]
    );
}

#[test]
fn cross_validation_generalizes_to_held_out_folds() {
    let (eeg, stimulus) = synthetic_recording(1500, 0.4, 3);
    let cca = CcaConfig {
        n_components: 1,
        covariance: CovarianceKind::LedoitWolf,
        regularization_rank: None,
    };
    let cv = CrossValConfig {
        folds: 5,
        lag: 5,
        causal: true,
    };
    let report = cross_validate_cca(eeg.view(), stimulus.view(), &cca, &cv).unwrap();
    assert_eq!(report.test_correlations.nrows(), 5);
    assert!(
        report.mean_test[0] > 0.3,
        "held-out correlation collapsed to {}",
        report.mean_test[0]
    );
    // The final model is fit on the full recording and scores it well.
    let full_design = convolution_matrix(cv.lag, stimulus.view(), cv.causal).unwrap();
    let scored = report
        .final_model
        .apply(eeg.view(), full_design.view())
        .unwrap();
    assert!(scored.correlations[0] > 0.3);
}

#[test]
fn gcca_recovers_component_shared_across_subjects() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
    let t = 800;
    let latent: Vec<f64> = (0..t).map(|_| rng.random_range(-1.0..1.0)).collect();
    let stack = Array3::from_shape_fn((t, 3, 4), |(i, ch, _)| {
        if ch == 0 {
            latent[i] + 0.3 * rng.random_range(-1.0..1.0)
        } else {
            rng.random_range(-1.0..1.0)
        }
    });
    let config = GccaConfig {
        n_components: 2,
        covariance: CovarianceKind::LedoitWolf,
    };
    let model = fit_gcca(&stack, &config).unwrap();
    assert!(
        model.train_correlations[0] > 0.5,
        "shared component not recovered, got {}",
        model.train_correlations[0]
    );
    // The first component dominates the second.
    assert!(model.train_correlations[0] > model.train_correlations[1]);
}

#[test]
fn multi_modal_gcca_links_recordings_to_stimulus_features() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let t = 800;
    let latent: Vec<f64> = (0..t).map(|_| rng.random_range(-1.0..1.0)).collect();
    let stack = Array3::from_shape_fn((t, 2, 3), |(i, _, _)| {
        latent[i] + 0.4 * rng.random_range(-1.0..1.0)
    });
    let features = Array2::from_shape_fn((t, 2), |(i, j)| {
        if j == 0 {
            latent[i] + 0.4 * rng.random_range(-1.0..1.0)
        } else {
            rng.random_range(-1.0..1.0)
        }
    });
    let modalities = vec![Modality::Stack(stack), Modality::Features(features)];
    let config = MultiModalConfig {
        n_components: 1,
        covariance: CovarianceKind::LedoitWolf,
        rhos: vec![1.0, 5.0],
        assume_symmetric: false,
    };
    let model = fit_multi_modal(&modalities, &config).unwrap();
    let correlations = model.apply(&modalities).unwrap();
    assert!(
        correlations[0] > 0.5,
        "shared stimulus component not recovered, got {}",
        correlations[0]
    );
}

#[test]
fn permutation_test_separates_signal_from_null() {
    let (eeg, stimulus) = synthetic_recording(600, 0.2, 6);
    let design = convolution_matrix(1, stimulus.view(), true).unwrap();
    let cca = CcaConfig {
        n_components: 1,
        covariance: CovarianceKind::LedoitWolf,
        regularization_rank: None,
    };
    let model = fit_cca(eeg.view(), design.view(), &cca).unwrap();
    let config = PermutationConfig {
        n_trials: 50,
        block_duration: 0.5,
        sample_rate: 20.0,
        top_k: 1,
        percentile: 0.95,
        seed: 7,
    };
    let null = permutation_test_cca(
        eeg.view(),
        stimulus.view(),
        Some(&model),
        1,
        true,
        &config,
        None,
    )
    .unwrap();
    assert_eq!(null.n_trials(), 50);
    let level = null.significance_levels(config.percentile).unwrap();
    assert!(
        model.train.correlations[0] > level[0],
        "true correlation {} should exceed the null significance level {}",
        model.train.correlations[0],
        level[0]
    );
}

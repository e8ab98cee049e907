//! Block-shuffle permutation test for correlation significance.
//!
//! Shuffling whole blocks of contiguous samples destroys the stimulus-
//! response alignment while preserving the autocorrelation structure inside
//! each block, so the resulting null distribution accounts for the temporal
//! dependence that makes naive sample-level permutation anticonservative.
//!
//! Trials draw their RNG streams from a counter-derived seed, so the null
//! distribution is reproducible and identical between serial and parallel
//! runs of the same configuration.

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::cca::{self, CcaModel};
use crate::config::{CcaConfig, PermutationConfig};
use crate::covariance::CovarianceKind;
use crate::error::{EstimationError, Result};
use crate::gcca::MultiModalModel;
use crate::linalg::{block_hankel, convolution_matrix};
use crate::types::Modality;

/// Derive a per-trial RNG seed from a base seed and a trial counter.
///
/// SplitMix64 finalizer; decorrelates consecutive counters so every trial
/// gets an independent Xoshiro stream from one user-facing seed.
#[inline]
pub fn counter_rng_seed(base_seed: u64, counter: u64) -> u64 {
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Shuffle the time axis of a T x D x N stack in whole blocks of
/// `block_len` samples, independently per subject.
///
/// When T is not a multiple of the block length the final block is
/// zero-padded, so the output has `ceil(T / block_len) * block_len` samples;
/// an exact multiple stays unpadded.
pub fn shuffle_blocks<R: Rng>(
    stack: ArrayView3<f64>,
    block_len: usize,
    rng: &mut R,
) -> Result<Array3<f64>> {
    let (t, d, n) = stack.dim();
    if block_len == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "shuffle block length must be at least 1 sample".into(),
        ));
    }
    if t == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "cannot shuffle an empty recording".into(),
        ));
    }
    let n_blocks = t.div_ceil(block_len);
    let padded = n_blocks * block_len;
    let mut out = Array3::zeros((padded, d, n));
    let mut order: Vec<usize> = Vec::with_capacity(n_blocks);
    for subj in 0..n {
        order.clear();
        order.extend(0..n_blocks);
        order.shuffle(rng);
        for (dst, &src) in order.iter().enumerate() {
            let src_start = src * block_len;
            let src_end = (src_start + block_len).min(t);
            let len = src_end - src_start;
            let dst_start = dst * block_len;
            out.slice_mut(s![dst_start..dst_start + len, .., subj])
                .assign(&stack.slice(s![src_start..src_end, .., subj]));
        }
    }
    Ok(out)
}

/// Block-shuffle a single T x D signal.
pub fn shuffle_blocks_signal<R: Rng>(
    x: ArrayView2<f64>,
    block_len: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let shuffled = shuffle_blocks(x.insert_axis(Axis(2)), block_len, rng)?;
    Ok(shuffled.index_axis(Axis(2), 0).to_owned())
}

/// Block-shuffle a length-T series.
pub fn shuffle_blocks_series<R: Rng>(
    x: ArrayView1<f64>,
    block_len: usize,
    rng: &mut R,
) -> Result<Array1<f64>> {
    let shuffled = shuffle_blocks_signal(x.insert_axis(Axis(1)), block_len, rng)?;
    Ok(shuffled.index_axis(Axis(1), 0).to_owned())
}

/// Null distribution of correlation values accumulated over shuffled trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullDistribution {
    samples: Array2<f64>,
}

impl NullDistribution {
    /// Number of completed trials (rows).
    pub fn n_trials(&self) -> usize {
        self.samples.nrows()
    }

    /// The raw trials-by-components sample matrix.
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    /// Per-component significance level: the given percentile of the sorted
    /// absolute null correlations. An observed correlation above this level
    /// rejects the null at `1 - percentile`.
    pub fn significance_levels(&self, percentile: f64) -> Result<Array1<f64>> {
        if !(percentile > 0.0 && percentile <= 1.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "percentile must be in (0, 1], got {percentile}"
            )));
        }
        let n = self.samples.nrows();
        if n == 0 {
            return Err(EstimationError::InvalidConfiguration(
                "null distribution has no completed trials".into(),
            ));
        }
        let idx = ((n as f64 * percentile).floor() as usize).min(n - 1);
        let k = self.samples.ncols();
        let mut levels = Array1::zeros(k);
        for comp in 0..k {
            let mut column: Vec<f64> = self.samples.column(comp).iter().map(|v| v.abs()).collect();
            column.sort_by(f64::total_cmp);
            levels[comp] = column[idx];
        }
        Ok(levels)
    }
}

fn validate_common(config: &PermutationConfig) -> Result<usize> {
    let block_len = config.block_len();
    if block_len == 0 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "block duration {}s at {} Hz yields an empty shuffle block",
            config.block_duration, config.sample_rate
        )));
    }
    if config.n_trials == 0 || config.top_k == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "permutation test requires at least one trial and one component".into(),
        ));
    }
    Ok(block_len)
}

/// Run all trials, in parallel when the `parallel` feature is enabled.
/// Trial order is preserved either way, so identical seeds give identical
/// null distributions.
fn run_trials<F>(n_trials: usize, trial: F) -> Result<Vec<Option<Array1<f64>>>>
where
    F: Fn(usize) -> Result<Option<Array1<f64>>> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        crate::thread_pool::install(|| (0..n_trials).into_par_iter().map(|i| trial(i)).collect())
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..n_trials).map(trial).collect()
    }
}

fn collect_distribution(
    rows: Vec<Option<Array1<f64>>>,
    config: &PermutationConfig,
) -> Result<NullDistribution> {
    let completed: Vec<Array1<f64>> = rows.into_iter().flatten().collect();
    if completed.len() < config.n_trials {
        log::warn!(
            "permutation test aborted after {} of {} trials",
            completed.len(),
            config.n_trials
        );
    }
    let mut samples = Array2::zeros((completed.len(), config.top_k));
    for (i, row) in completed.iter().enumerate() {
        samples.row_mut(i).assign(row);
    }
    Ok(NullDistribution { samples })
}

fn aborted(abort: Option<&AtomicBool>) -> bool {
    abort.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Build the null distribution of CCA correlations under block shuffling.
///
/// Each trial independently shuffles the recording and the stimulus, expands
/// the shuffled stimulus into its `lag`-tap FIR design, and scores. With
/// `model` given, the fitted filters project the shuffled data; without one,
/// a fresh shrinkage-regularized CCA is fitted per trial and its training
/// correlations enter the null.
///
/// `abort`, when given, is polled per trial; setting it stops the test early
/// and the distribution holds only the trials completed so far.
pub fn permutation_test_cca(
    eeg: ArrayView2<f64>,
    stimulus: ArrayView1<f64>,
    model: Option<&CcaModel>,
    lag: usize,
    causal: bool,
    config: &PermutationConfig,
    abort: Option<&AtomicBool>,
) -> Result<NullDistribution> {
    let block_len = validate_common(config)?;
    if eeg.nrows() != stimulus.len() {
        return Err(EstimationError::TimeDimensionMismatch {
            left: eeg.nrows(),
            right: stimulus.len(),
        });
    }
    if let Some(m) = model {
        if m.n_components() < config.top_k {
            return Err(EstimationError::RankExceeded {
                requested: config.top_k,
                available: m.n_components(),
            });
        }
    }
    let refit = CcaConfig {
        n_components: config.top_k,
        covariance: CovarianceKind::LedoitWolf,
        regularization_rank: None,
    };
    log::info!(
        "CCA permutation test: {} trials, block length {} samples",
        config.n_trials,
        block_len
    );

    let trial = |i: usize| -> Result<Option<Array1<f64>>> {
        if aborted(abort) {
            return Ok(None);
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(counter_rng_seed(config.seed, i as u64));
        let shuffled_eeg = shuffle_blocks_signal(eeg, block_len, &mut rng)?;
        let shuffled_stim = shuffle_blocks_series(stimulus, block_len, &mut rng)?;
        let design = convolution_matrix(lag, shuffled_stim.view(), causal)?;
        let correlations = match model {
            Some(m) => m.apply(shuffled_eeg.view(), design.view())?.correlations,
            None => {
                cca::fit(shuffled_eeg.view(), design.view(), &refit)?
                    .train
                    .correlations
            }
        };
        Ok(Some(correlations.slice(s![..config.top_k]).to_owned()))
    };

    let rows = run_trials(config.n_trials, trial)?;
    collect_distribution(rows, config)
}

/// Build the null distribution of multi-modal GCCA correlations under block
/// shuffling.
///
/// Every dataset of every modality is shuffled independently per trial, then
/// projected through the fitted weights. Feature modalities are FIR-expanded
/// after shuffling when `lag > 1`, matching the expansion the model was
/// fitted with.
pub fn permutation_test_multi_modal(
    modalities: &[Modality],
    model: &MultiModalModel,
    lag: usize,
    causal: bool,
    config: &PermutationConfig,
    abort: Option<&AtomicBool>,
) -> Result<NullDistribution> {
    let block_len = validate_common(config)?;
    if model.n_components() < config.top_k {
        return Err(EstimationError::RankExceeded {
            requested: config.top_k,
            available: model.n_components(),
        });
    }
    log::info!(
        "multi-modal permutation test: {} trials, block length {} samples",
        config.n_trials,
        block_len
    );

    let trial = |i: usize| -> Result<Option<Array1<f64>>> {
        if aborted(abort) {
            return Ok(None);
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(counter_rng_seed(config.seed, i as u64));
        let mut shuffled = Vec::with_capacity(modalities.len());
        for modality in modalities {
            match modality {
                Modality::Stack(x) => {
                    shuffled.push(Modality::Stack(shuffle_blocks(x.view(), block_len, &mut rng)?));
                }
                Modality::Features(f) => {
                    let features = shuffle_blocks_signal(f.view(), block_len, &mut rng)?;
                    let expanded = if lag > 1 {
                        block_hankel(features.view(), lag, causal)?
                    } else {
                        features
                    };
                    shuffled.push(Modality::Features(expanded));
                }
            }
        }
        let correlations = model.apply(&shuffled)?;
        Ok(Some(correlations.slice(s![..config.top_k]).to_owned()))
    };

    let rows = run_trials(config.n_trials, trial)?;
    collect_distribution(rows, config)
}

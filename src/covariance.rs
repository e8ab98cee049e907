//! Covariance and cross-covariance estimation.
//!
//! Two estimators are supported per call: the empirical sample covariance and
//! Ledoit-Wolf optimal shrinkage toward a scaled identity target, which
//! reduces estimation variance when the channel count is large relative to
//! the sample count. Cross-covariance blocks are always extracted from one
//! joint computation so the X-Y and Y-X blocks stay consistent.

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use ndarray_linalg::Inverse;
use ndarray_stats::CorrelationExt;
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};
use crate::linalg::{sorted_eigh, SortOrder};

/// Covariance estimator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceKind {
    /// Unbiased sample covariance.
    Empirical,
    /// Ledoit-Wolf shrinkage toward a scaled identity target.
    LedoitWolf,
}

/// Per-block covariances of a joint `[X | Y]` computation.
#[derive(Debug, Clone)]
pub struct JointCovariance {
    /// D x D covariance of X.
    pub rx: Array2<f64>,
    /// L x L covariance of Y.
    pub ry: Array2<f64>,
    /// D x L cross-covariance of X and Y.
    pub rxy: Array2<f64>,
    /// L x D cross-covariance of Y and X.
    pub ryx: Array2<f64>,
}

fn require_samples(t: usize) -> Result<()> {
    if t < 2 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "covariance estimation requires at least 2 samples, got {t}"
        )));
    }
    Ok(())
}

/// Unbiased empirical covariance of a time-major signal (observations in
/// rows).
pub fn empirical_covariance(x: ArrayView2<f64>) -> Result<Array2<f64>> {
    require_samples(x.nrows())?;
    x.t().cov(1.0).map_err(|e| {
        EstimationError::InvalidConfiguration(format!("empirical covariance failed: {e}"))
    })
}

/// Ledoit-Wolf shrinkage covariance of a time-major signal.
///
/// Blends the (biased) sample covariance `S` with the scaled identity
/// `mu * I` using the closed-form optimal shrinkage intensity of Ledoit &
/// Wolf (2004). The result is well conditioned even when D approaches T.
pub fn ledoit_wolf(x: ArrayView2<f64>) -> Result<Array2<f64>> {
    let t = x.nrows();
    let d = x.ncols();
    require_samples(t)?;
    let t_f = t as f64;
    let d_f = d as f64;

    let mean = x.sum_axis(Axis(0)) / t_f;
    let centered = &x - &mean;
    let s = centered.t().dot(&centered) / t_f;

    let mu = s.diag().sum() / d_f;
    // delta^2 = ||S - mu I||_F^2 / d
    let mut delta2 = 0.0;
    for i in 0..d {
        for j in 0..d {
            let target = if i == j { mu } else { 0.0 };
            delta2 += (s[(i, j)] - target).powi(2);
        }
    }
    delta2 /= d_f;

    // bbar^2 = (sum_t ||x_t||^4 - T ||S||_F^2) / (T^2 d)
    let sum_norm4: f64 = centered
        .rows()
        .into_iter()
        .map(|row| {
            let n2 = row.dot(&row);
            n2 * n2
        })
        .sum();
    let s_frob2: f64 = s.iter().map(|v| v * v).sum();
    let bbar2 = ((sum_norm4 - t_f * s_frob2) / (t_f * t_f * d_f)).max(0.0);

    let beta2 = bbar2.min(delta2);
    let shrinkage = if delta2 > 0.0 { beta2 / delta2 } else { 1.0 };

    let mut shrunk = s.mapv(|v| v * (1.0 - shrinkage));
    for i in 0..d {
        shrunk[(i, i)] += shrinkage * mu;
    }
    Ok(shrunk)
}

/// Covariance with the estimator selected per call.
pub fn covariance(x: ArrayView2<f64>, kind: CovarianceKind) -> Result<Array2<f64>> {
    match kind {
        CovarianceKind::Empirical => empirical_covariance(x),
        CovarianceKind::LedoitWolf => ledoit_wolf(x),
    }
}

/// Joint covariance of two signal blocks sharing a time axis.
///
/// The cross blocks come from one covariance of the concatenated `[X | Y]`
/// matrix, which guarantees `rxy == ryx^T` exactly. With
/// [`CovarianceKind::LedoitWolf`] the auto blocks are replaced by shrinkage
/// estimates while the cross blocks stay empirical.
pub fn joint_covariance<'a>(
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    kind: CovarianceKind,
) -> Result<JointCovariance> {
    if x.nrows() != y.nrows() {
        return Err(EstimationError::TimeDimensionMismatch {
            left: x.nrows(),
            right: y.nrows(),
        });
    }
    let d = x.ncols();
    let l = y.ncols();
    let joint = concatenate(Axis(1), &[x, y]).map_err(|e| {
        EstimationError::InvalidConfiguration(format!("joint covariance concatenation failed: {e}"))
    })?;
    let c = empirical_covariance(joint.view())?;
    let mut jc = JointCovariance {
        rx: c.slice(s![..d, ..d]).to_owned(),
        ry: c.slice(s![d..d + l, d..d + l]).to_owned(),
        rxy: c.slice(s![..d, d..d + l]).to_owned(),
        ryx: c.slice(s![d..d + l, ..d]).to_owned(),
    };
    if kind == CovarianceKind::LedoitWolf {
        jc.rx = ledoit_wolf(x)?;
        jc.ry = ledoit_wolf(y)?;
    }
    Ok(jc)
}

/// Repair a symmetric matrix to positive semi-definiteness.
///
/// If any eigenvalue is negative, the whole spectrum is shifted up by the
/// most negative eigenvalue and the matrix reconstructed. The result is
/// guaranteed PSD (it may still be singular); matrices that already are PSD
/// pass through unchanged.
pub fn repair_psd(m: &Array2<f64>) -> Result<Array2<f64>> {
    let (values, vectors) = sorted_eigh(m, SortOrder::Ascending)?;
    if values[0] >= 0.0 {
        return Ok(m.clone());
    }
    let shifted = values.mapv(|v| v - values[0]);
    Ok(vectors.dot(&Array2::from_diag(&shifted)).dot(&vectors.t()))
}

/// Forward model mapping latent components back to observation space.
///
/// Given observations `X` (T x D) and backward filters `W` (D x K), the
/// forward model is `A = Rxx W inv(W^T Rxx W)`; its columns are the
/// activation patterns used for neurophysiological interpretation of the
/// filters (Haufe et al., 2014).
pub fn forward_model(
    x: ArrayView2<f64>,
    w: &Array2<f64>,
    kind: CovarianceKind,
) -> Result<Array2<f64>> {
    if x.ncols() != w.nrows() {
        return Err(EstimationError::ChannelDimensionMismatch {
            left: x.ncols(),
            right: w.nrows(),
        });
    }
    let rxx = covariance(x, kind)?;
    let latent = w.t().dot(&rxx).dot(w);
    let inv = latent.inv().map_err(|_| EstimationError::SingularCovariance {
        rank: 0,
        dim: latent.nrows(),
    })?;
    Ok(rxx.dot(w).dot(&inv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn random_signal(t: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Array2::from_shape_fn((t, d), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn test_empirical_covariance_known_values() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let c = empirical_covariance(x.view()).unwrap();
        // Both columns have variance 4 and covariance 4.
        assert_abs_diff_eq!(c[(0, 0)], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c[(1, 1)], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c[(0, 1)], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c[(1, 0)], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ledoit_wolf_is_symmetric_and_well_conditioned() {
        let x = random_signal(50, 8, 7);
        let c = ledoit_wolf(x.view()).unwrap();
        for i in 0..8 {
            for j in 0..8 {
                assert_abs_diff_eq!(c[(i, j)], c[(j, i)], epsilon = 1e-12);
            }
        }
        let (values, _) = sorted_eigh(&c, SortOrder::Ascending).unwrap();
        assert!(values[0] > 0.0, "shrinkage estimate must be PD");
    }

    #[test]
    fn test_ledoit_wolf_shrinks_toward_scaled_identity() {
        // With very few samples, off-diagonal mass should be smaller than in
        // the raw sample covariance.
        let x = random_signal(6, 5, 11);
        let lw = ledoit_wolf(x.view()).unwrap();
        let emp = empirical_covariance(x.view()).unwrap();
        let off = |c: &Array2<f64>| -> f64 {
            let mut sum = 0.0;
            for i in 0..5 {
                for j in 0..5 {
                    if i != j {
                        sum += c[(i, j)].abs();
                    }
                }
            }
            sum
        };
        assert!(off(&lw) < off(&emp));
    }

    #[test]
    fn test_joint_covariance_cross_blocks_transpose() {
        let x = random_signal(100, 4, 1);
        let y = random_signal(100, 2, 2);
        let jc = joint_covariance(x.view(), y.view(), CovarianceKind::Empirical).unwrap();
        assert_eq!(jc.rxy.dim(), (4, 2));
        assert_eq!(jc.ryx.dim(), (2, 4));
        for i in 0..4 {
            for j in 0..2 {
                assert_abs_diff_eq!(jc.rxy[(i, j)], jc.ryx[(j, i)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_joint_covariance_time_mismatch() {
        let x = random_signal(100, 4, 1);
        let y = random_signal(99, 2, 2);
        assert!(matches!(
            joint_covariance(x.view(), y.view(), CovarianceKind::Empirical),
            Err(EstimationError::TimeDimensionMismatch {
                left: 100,
                right: 99
            })
        ));
    }

    #[test]
    fn test_repair_psd_clips_negative_spectrum() {
        let m = array![[1.0, 0.0], [0.0, -0.5]];
        let repaired = repair_psd(&m).unwrap();
        let (values, _) = sorted_eigh(&repaired, SortOrder::Ascending).unwrap();
        assert!(values[0] >= -1e-12);
        // Already-PSD input passes through unchanged.
        let psd = array![[2.0, 0.1], [0.1, 1.0]];
        assert_eq!(repair_psd(&psd).unwrap(), psd);
    }

    #[test]
    fn test_forward_model_rejects_channel_mismatch() {
        let x = random_signal(50, 3, 5);
        let w = Array2::<f64>::eye(4);
        assert!(matches!(
            forward_model(x.view(), &w, CovarianceKind::Empirical),
            Err(EstimationError::ChannelDimensionMismatch { left: 3, right: 4 })
        ));
    }

    #[test]
    fn test_forward_model_identity_filters() {
        // With W square and invertible, A = Rxx W inv(W^T Rxx W) = inv(W^T).
        let x = random_signal(200, 3, 3);
        let w = Array2::<f64>::eye(3);
        let a = forward_model(x.view(), &w, CovarianceKind::Empirical).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(a[(i, j)], expected, epsilon = 1e-8);
            }
        }
    }
}

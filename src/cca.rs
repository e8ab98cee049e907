//! Two-set canonical correlation analysis with PCA regularization.
//!
//! Training forms the two generalized-eigenvalue products
//! `A = Rx^-1 Rxy Ry^-1 Ryx` and `B = Ry^-1 Ryx Rx^-1 Rxy`, whose non-zero
//! spectra agree up to numerical tolerance; the top eigenvectors of each are
//! the canonical filters. Fitting and scoring are separate operations: a
//! fitted [`CcaModel`] projects new data without re-estimating covariances
//! and without re-normalizing signs.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::config::CcaConfig;
use crate::constants::EIGENVALUE_AGREEMENT_TOLERANCE;
use crate::covariance::joint_covariance;
use crate::error::{EstimationError, Result};
use crate::linalg::{effective_rank, pca_regularized_inverse, sorted_eig, SortOrder};
use crate::types::ComponentCorrelations;

/// Fitted canonical correlation filters with their training correlations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcaModel {
    /// D x K canonical filters for the first signal block.
    pub wx: Array2<f64>,
    /// L x K canonical filters for the second signal block.
    pub wy: Array2<f64>,
    /// Training correlations and p-values, sign-normalized to be
    /// non-negative.
    pub train: ComponentCorrelations,
}

/// Pearson correlation of two equally long series.
///
/// Returns 0 when either series has zero variance.
pub(crate) fn pearson_r(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let mut num = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        num += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    num / (var_a.sqrt() * var_b.sqrt())
}

/// Two-sided p-value for a Pearson correlation under the null hypothesis
/// that the series are uncorrelated and normally distributed.
pub(crate) fn pearson_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let dof = (n - 2) as f64;
    let r2 = r * r;
    if r2 >= 1.0 {
        return 0.0;
    }
    let t_stat = r.abs() * (dof / (1.0 - r2)).sqrt();
    match StudentsT::new(0.0, 1.0, dof) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t_stat)),
        Err(_) => 1.0,
    }
}

/// Correlations and p-values of paired projection columns.
pub(crate) fn column_correlations(
    xt: &Array2<f64>,
    yt: &Array2<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let k = xt.ncols().min(yt.ncols());
    let n = xt.nrows();
    let mut correlations = Array1::zeros(k);
    let mut p_values = Array1::zeros(k);
    for c in 0..k {
        let r = pearson_r(xt.column(c), yt.column(c));
        correlations[c] = r;
        p_values[c] = pearson_p_value(r, n);
    }
    (correlations, p_values)
}

/// Fit canonical correlation filters on `x` (T x D) and `y` (T x L).
///
/// The inverse covariances are PCA-regularized: by default to each block's
/// effective rank, or to `min(rank_x, rank_y, K)` when an explicit
/// regularization rank `K` is configured. Requesting more components than
/// the available rank fails with [`EstimationError::RankExceeded`] instead
/// of silently truncating.
pub fn fit(x: ArrayView2<f64>, y: ArrayView2<f64>, config: &CcaConfig) -> Result<CcaModel> {
    if config.n_components == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "n_components must be at least 1".into(),
        ));
    }
    let jc = joint_covariance(x.view(), y.view(), config.covariance)?;
    let rank_x = effective_rank(&jc.rx)?;
    let rank_y = effective_rank(&jc.ry)?;
    let (reg_x, reg_y) = match config.regularization_rank {
        None => (rank_x, rank_y),
        Some(k) => {
            let k = k.min(rank_x).min(rank_y);
            (k, k)
        }
    };
    let available = reg_x.min(reg_y);
    if config.n_components > available {
        return Err(EstimationError::RankExceeded {
            requested: config.n_components,
            available,
        });
    }
    log::debug!(
        "CCA fit: T={} D={} L={} rank_x={} rank_y={} reg=({}, {})",
        x.nrows(),
        x.ncols(),
        y.ncols(),
        rank_x,
        rank_y,
        reg_x,
        reg_y
    );

    let inv_rx = pca_regularized_inverse(&jc.rx, reg_x)?;
    let inv_ry = pca_regularized_inverse(&jc.ry, reg_y)?;
    let a = inv_rx.dot(&jc.rxy).dot(&inv_ry).dot(&jc.ryx);
    let b = inv_ry.dot(&jc.ryx).dot(&inv_rx).dot(&jc.rxy);

    let (lam_a, vec_a) = sorted_eig(&a, SortOrder::Descending)?;
    let (lam_b, vec_b) = sorted_eig(&b, SortOrder::Descending)?;
    check_spectra_agree(&lam_a, &lam_b, config.n_components);

    // The products have real non-negative spectra in exact arithmetic; the
    // imaginary residue is numerical noise and is discarded here.
    let k = config.n_components;
    let mut wx = vec_a.slice(s![.., ..k]).mapv(|v| v.re);
    let wy = vec_b.slice(s![.., ..k]).mapv(|v| v.re);

    let xt = x.dot(&wx);
    let yt = y.dot(&wy);
    let (mut correlations, p_values) = column_correlations(&xt, &yt);

    // Flip (X filter, correlation) pairs so training correlations are >= 0.
    for c in 0..k {
        if correlations[c] < 0.0 {
            correlations[c] = -correlations[c];
            wx.column_mut(c).mapv_inplace(|v| -v);
        }
    }

    Ok(CcaModel {
        wx,
        wy,
        train: ComponentCorrelations {
            correlations,
            p_values,
        },
    })
}

fn check_spectra_agree(lam_a: &Array1<ndarray_linalg::c64>, lam_b: &Array1<ndarray_linalg::c64>, k: usize) {
    let k = k.min(lam_a.len()).min(lam_b.len());
    for i in 0..k {
        let a = lam_a[i].re;
        let b = lam_b[i].re;
        let scale = a.abs().max(b.abs()).max(1e-8);
        if (a - b).abs() > EIGENVALUE_AGREEMENT_TOLERANCE * scale {
            log::warn!(
                "CCA eigenvalue {i} disagrees between products: {a:.6e} vs {b:.6e}; \
                 covariance estimates may be ill-conditioned"
            );
        }
    }
}

impl CcaModel {
    /// Number of canonical components held by this model.
    pub fn n_components(&self) -> usize {
        self.wx.ncols()
    }

    /// Score previously unseen data through the fitted filters.
    ///
    /// No covariance estimation and no sign normalization happen here; signs
    /// are inherited from training.
    pub fn apply(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<ComponentCorrelations> {
        if x.nrows() != y.nrows() {
            return Err(EstimationError::TimeDimensionMismatch {
                left: x.nrows(),
                right: y.nrows(),
            });
        }
        if x.ncols() != self.wx.nrows() {
            return Err(EstimationError::ChannelDimensionMismatch {
                left: x.ncols(),
                right: self.wx.nrows(),
            });
        }
        if y.ncols() != self.wy.nrows() {
            return Err(EstimationError::ChannelDimensionMismatch {
                left: y.ncols(),
                right: self.wy.nrows(),
            });
        }
        let xt = x.dot(&self.wx);
        let yt = y.dot(&self.wy);
        let (correlations, p_values) = column_correlations(&xt, &yt);
        Ok(ComponentCorrelations {
            correlations,
            p_values,
        })
    }
}

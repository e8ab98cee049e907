//! Generalized CCA for multi-subject and multi-modal data.
//!
//! The single-modality form solves the symmetric-definite generalized
//! eigenproblem `Dxx W = Rxx W diag(lambda)` for the smallest eigenvalues
//! (minimal lambda corresponds to maximal shared correlation), where `Rxx`
//! is the whole covariance of the flattened stack and `Dxx` its
//! block-diagonal within-subject part. The multi-modal form biases the
//! problem with per-modality weights `rho`, which breaks the symmetry of
//! `Rxx` and forces the full complex eigensolver with an explicit
//! real-part-taking step.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use ndarray_linalg::{Cholesky, Inverse, UPLO};
use ndarray_stats::CorrelationExt;
use serde::{Deserialize, Serialize};

use crate::config::{GccaConfig, MultiModalConfig};
use crate::covariance::{empirical_covariance, ledoit_wolf, repair_psd, CovarianceKind};
use crate::error::{EstimationError, Result};
use crate::linalg::{effective_rank, pca_regularized_inverse, sorted_eig, sorted_eigh, SortOrder};
use crate::types::{Modality, SignalStack};

/// Fitted single-modality GCCA weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GccaModel {
    /// D x N x K weight tensor, rescaled so each subject contributes unit
    /// projected variance per component.
    pub weights: Array3<f64>,
    /// The K smallest generalized eigenvalues, ascending.
    pub eigenvalues: Array1<f64>,
    /// Average pairwise correlation per component on the training data.
    pub train_correlations: Array1<f64>,
}

/// Per-modality weights of a multi-modal GCCA fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModalityWeights {
    /// D x N x K weights for a subject stack.
    Stack(Array3<f64>),
    /// L x K weights for a feature matrix.
    Features(Array2<f64>),
}

/// Fitted multi-modal GCCA weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiModalModel {
    /// Weights in the same order as the fitted modality list.
    pub weights: Vec<ModalityWeights>,
    /// Real parts of the K smallest generalized eigenvalues, ascending.
    pub eigenvalues: Array1<f64>,
}

/// Correlated component analysis (inter-subject correlation) weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedComponents {
    /// D x K shared spatial filters.
    pub weights: Array2<f64>,
    /// Inter-subject correlation per component, descending.
    pub isc: Array1<f64>,
}

/// Flatten a T x D x N stack into T x (D*N), subject blocks side by side.
fn flatten_stack(stack: &ArrayView3<f64>) -> Array2<f64> {
    let (t, d, n) = stack.dim();
    let mut flat = Array2::zeros((t, d * n));
    for subj in 0..n {
        flat.slice_mut(s![.., subj * d..(subj + 1) * d])
            .assign(&stack.index_axis(Axis(2), subj));
    }
    flat
}

/// Extract the block-diagonal part of `m` given per-block dimensions.
fn block_diagonal(m: &Array2<f64>, dims: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros(m.raw_dim());
    let mut start = 0;
    for &dim in dims {
        let range = start..start + dim;
        out.slice_mut(s![range.clone(), range.clone()])
            .assign(&m.slice(s![range.clone(), range]));
        start += dim;
    }
    out
}

/// Solve `A w = lambda B w` for symmetric A and symmetric positive-definite
/// B via Cholesky whitening, returning the `k` smallest eigenpairs.
fn generalized_eigh_smallest(
    a: &Array2<f64>,
    b: &Array2<f64>,
    k: usize,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let dim = b.nrows();
    let l = match b.cholesky(UPLO::Lower) {
        Ok(l) => l,
        Err(_) => {
            let rank = effective_rank(b).unwrap_or(0);
            return Err(EstimationError::SingularCovariance { rank, dim });
        }
    };
    let l_inv = l.inv()?;
    let m = l_inv.dot(a).dot(&l_inv.t());
    // Whitening leaves a tiny asymmetric residue; fold it back.
    let m = (&m + &m.t()) * 0.5;
    let (values, vectors) = sorted_eigh(&m, SortOrder::Ascending)?;
    let w = l_inv.t().dot(&vectors.slice(s![.., ..k]));
    Ok((values.slice(s![..k]).to_owned(), w))
}

/// Solve `A w = lambda B w` for general (possibly asymmetric) B with the
/// full complex eigensolver, taking real parts and returning the `k`
/// smallest eigenpairs by real part.
fn generalized_eig_smallest(
    a: &Array2<f64>,
    b: &Array2<f64>,
    k: usize,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let b_inv = b.inv()?;
    let m = b_inv.dot(a);
    let (values, vectors) = sorted_eig(&m, SortOrder::Ascending)?;
    // The rho-scaled problem has a real spectrum in exact arithmetic; the
    // imaginary residue is numerical noise and is discarded explicitly.
    Ok((
        values.slice(s![..k]).mapv(|v| v.re),
        vectors.slice(s![.., ..k]).mapv(|v| v.re),
    ))
}

/// Rescale weights so each subject's projected variance is 1 per component.
///
/// After rescaling, the denominators of all pairwise correlation
/// coefficients coincide, so the average pairwise correlation can be read
/// off one joint matrix product. Must run before
/// [`average_pairwise_correlation`]-based scoring of GCCA weights.
pub fn rescale(weights: &mut Array3<f64>, dxx: &Array2<f64>) {
    let (d, n, k) = weights.dim();
    for comp in 0..k {
        for subj in 0..n {
            let block = dxx.slice(s![subj * d..(subj + 1) * d, subj * d..(subj + 1) * d]);
            let w = weights.slice(s![.., subj, comp]).to_owned();
            let scale = w.dot(&block.dot(&w));
            if scale > f64::EPSILON {
                let inv = 1.0 / scale.sqrt();
                weights
                    .slice_mut(s![.., subj, comp])
                    .mapv_inplace(|v| v * inv);
            }
        }
    }
}

/// Average pairwise correlation across the columns of a T x N projection
/// matrix: the correlation matrix minus the identity, summed and divided by
/// `N (N - 1)`.
pub fn average_pairwise_correlation(projections: ArrayView2<f64>) -> Result<f64> {
    let n = projections.ncols();
    if n < 2 {
        return Err(EstimationError::InvalidConfiguration(
            "pairwise correlation requires at least two datasets".into(),
        ));
    }
    let corr = projections.t().pearson_correlation().map_err(|e| {
        EstimationError::InvalidConfiguration(format!("correlation matrix failed: {e}"))
    })?;
    Ok((corr.sum() - n as f64) / (n as f64 * (n - 1) as f64))
}

/// Project every subject of a stack through its weight column for one
/// component, yielding a T x N matrix.
fn project_stack(stack: &ArrayView3<f64>, weights: &Array3<f64>, comp: usize) -> Array2<f64> {
    let (t, _, n) = stack.dim();
    let mut proj = Array2::zeros((t, n));
    for subj in 0..n {
        let w = weights.slice(s![.., subj, comp]).to_owned();
        let col = stack.index_axis(Axis(2), subj).dot(&w);
        proj.column_mut(subj).assign(&col);
    }
    proj
}

fn validate_stack(stack: &SignalStack, n_components: usize) -> Result<()> {
    let (t, d, n) = stack.dim();
    if n < 2 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "GCCA requires at least two subjects, got {n}"
        )));
    }
    if t < 2 {
        return Err(EstimationError::InvalidConfiguration(format!(
            "GCCA requires at least two samples, got {t}"
        )));
    }
    if n_components == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "n_components must be at least 1".into(),
        ));
    }
    if n_components > d * n {
        return Err(EstimationError::RankExceeded {
            requested: n_components,
            available: d * n,
        });
    }
    Ok(())
}

/// Fit single-modality GCCA on a T x D x N stack.
pub fn fit(stack: &SignalStack, config: &GccaConfig) -> Result<GccaModel> {
    validate_stack(stack, config.n_components)?;
    let (_, d, n) = stack.dim();
    let k = config.n_components;

    let flat = flatten_stack(&stack.view());
    let rxx = match config.covariance {
        CovarianceKind::LedoitWolf => ledoit_wolf(flat.view())?,
        // The empirical estimate can pick up slightly negative eigenvalues;
        // repair before the definite eigenproblem.
        CovarianceKind::Empirical => repair_psd(&empirical_covariance(flat.view())?)?,
    };
    let dxx = block_diagonal(&rxx, &vec![d; n]);

    let (eigenvalues, w) = generalized_eigh_smallest(&dxx, &rxx, k)?;
    log::debug!(
        "GCCA fit: T={} D={} N={} K={} smallest eigenvalue {:.6e}",
        stack.dim().0,
        d,
        n,
        k,
        eigenvalues[0]
    );

    let mut weights = Array3::zeros((d, n, k));
    for comp in 0..k {
        for subj in 0..n {
            for ch in 0..d {
                weights[(ch, subj, comp)] = w[(subj * d + ch, comp)];
            }
        }
    }
    rescale(&mut weights, &dxx);

    let mut train_correlations = Array1::zeros(k);
    for comp in 0..k {
        let proj = project_stack(&stack.view(), &weights, comp);
        train_correlations[comp] = average_pairwise_correlation(proj.view())?;
    }

    Ok(GccaModel {
        weights,
        eigenvalues,
        train_correlations,
    })
}

impl GccaModel {
    /// Number of shared components held by this model.
    pub fn n_components(&self) -> usize {
        self.weights.dim().2
    }

    /// Score unseen data: project through the fitted weights and return the
    /// average pairwise correlation per component. No re-estimation.
    pub fn apply(&self, stack: &SignalStack) -> Result<Array1<f64>> {
        let (_, d, n) = stack.dim();
        let (wd, wn, k) = self.weights.dim();
        if d != wd || n != wn {
            return Err(EstimationError::ChannelDimensionMismatch {
                left: d * n,
                right: wd * wn,
            });
        }
        let mut correlations = Array1::zeros(k);
        for comp in 0..k {
            let proj = project_stack(&stack.view(), &self.weights, comp);
            correlations[comp] = average_pairwise_correlation(proj.view())?;
        }
        Ok(correlations)
    }
}

/// Flattened layout of a modality list: per-block dimensions and rhos.
struct FlatLayout {
    flat: Array2<f64>,
    block_dims: Vec<usize>,
    block_rhos: Vec<f64>,
}

fn flatten_modalities(modalities: &[Modality], rhos: &[f64]) -> Result<FlatLayout> {
    let t = modalities[0].samples();
    for m in modalities.iter().skip(1) {
        if m.samples() != t {
            return Err(EstimationError::TimeDimensionMismatch {
                left: t,
                right: m.samples(),
            });
        }
    }
    let total: usize = modalities.iter().map(Modality::flat_width).sum();
    let mut flat = Array2::zeros((t, total));
    let mut block_dims = Vec::new();
    let mut block_rhos = Vec::new();
    let mut col = 0;
    for (modality, &rho) in modalities.iter().zip(rhos.iter()) {
        match modality {
            Modality::Stack(x) => {
                let (_, d, n) = x.dim();
                for subj in 0..n {
                    flat.slice_mut(s![.., col..col + d])
                        .assign(&x.index_axis(Axis(2), subj));
                    block_dims.push(d);
                    block_rhos.push(rho);
                    col += d;
                }
            }
            Modality::Features(f) => {
                let l = f.ncols();
                flat.slice_mut(s![.., col..col + l]).assign(f);
                block_dims.push(l);
                block_rhos.push(rho);
                col += l;
            }
        }
    }
    Ok(FlatLayout {
        flat,
        block_dims,
        block_rhos,
    })
}

/// Fit multi-modal GCCA over heterogeneous datasets.
///
/// Each modality's covariance block can be shrinkage-estimated; the whole
/// covariance is then column-scaled by the per-modality `rho` weights. With
/// non-uniform rhos the scaled matrix is asymmetric, so the general complex
/// eigensolver is used; callers with uniform rhos may set
/// `assume_symmetric` to take the faster symmetric-definite path. The
/// branch is decided by this explicit capability flag, never inferred from
/// the data.
pub fn fit_multi_modal(modalities: &[Modality], config: &MultiModalConfig) -> Result<MultiModalModel> {
    if modalities.len() < 2 {
        return Err(EstimationError::InvalidConfiguration(
            "multi-modal GCCA requires at least two modalities".into(),
        ));
    }
    if config.rhos.len() != modalities.len() {
        return Err(EstimationError::InvalidConfiguration(format!(
            "expected {} rho coefficients, got {}",
            modalities.len(),
            config.rhos.len()
        )));
    }
    if config.assume_symmetric {
        let first = config.rhos[0];
        if config.rhos.iter().any(|&r| (r - first).abs() > f64::EPSILON) {
            return Err(EstimationError::InvalidConfiguration(
                "assume_symmetric requires uniform rho coefficients".into(),
            ));
        }
    }
    let k = config.n_components;
    if k == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "n_components must be at least 1".into(),
        ));
    }

    let layout = flatten_modalities(modalities, &config.rhos)?;
    let total = layout.flat.ncols();
    if k > total {
        return Err(EstimationError::RankExceeded {
            requested: k,
            available: total,
        });
    }

    let mut rxx = empirical_covariance(layout.flat.view())?;
    let mut start = 0;
    for &dim in &layout.block_dims {
        let range = start..start + dim;
        if config.covariance == CovarianceKind::LedoitWolf {
            let block = ledoit_wolf(layout.flat.slice(s![.., range.clone()]))?;
            rxx.slice_mut(s![range.clone(), range.clone()]).assign(&block);
        }
        start += dim;
    }
    let dxx = block_diagonal(&rxx, &layout.block_dims);

    // Column scaling by rho biases each modality's contribution.
    let mut col = 0;
    for (&dim, &rho) in layout.block_dims.iter().zip(layout.block_rhos.iter()) {
        for j in col..col + dim {
            rxx.column_mut(j).mapv_inplace(|v| v * rho);
        }
        col += dim;
    }

    let (eigenvalues, w) = if config.assume_symmetric {
        generalized_eigh_smallest(&dxx, &rxx, k)?
    } else {
        generalized_eig_smallest(&dxx, &rxx, k)?
    };

    // Split the joint weight matrix back into per-modality shapes.
    let mut weights = Vec::with_capacity(modalities.len());
    let mut row = 0;
    for modality in modalities {
        match modality {
            Modality::Stack(x) => {
                let (_, d, n) = x.dim();
                let mut stacked = Array3::zeros((d, n, k));
                for comp in 0..k {
                    for subj in 0..n {
                        for ch in 0..d {
                            stacked[(ch, subj, comp)] = w[(row + subj * d + ch, comp)];
                        }
                    }
                }
                weights.push(ModalityWeights::Stack(stacked));
                row += d * n;
            }
            Modality::Features(f) => {
                let l = f.ncols();
                weights.push(ModalityWeights::Features(
                    w.slice(s![row..row + l, ..]).to_owned(),
                ));
                row += l;
            }
        }
    }

    Ok(MultiModalModel {
        weights,
        eigenvalues,
    })
}

impl MultiModalModel {
    /// Number of shared components held by this model.
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Score a modality list: project every dataset through its weights and
    /// return the average pairwise correlation per component.
    pub fn apply(&self, modalities: &[Modality]) -> Result<Array1<f64>> {
        if modalities.len() != self.weights.len() {
            return Err(EstimationError::InvalidConfiguration(format!(
                "expected {} modalities, got {}",
                self.weights.len(),
                modalities.len()
            )));
        }
        let t = modalities[0].samples();
        let n_total: usize = modalities.iter().map(Modality::dataset_count).sum();
        let k = self.n_components();
        let mut correlations = Array1::zeros(k);
        for comp in 0..k {
            let mut proj = Array2::zeros((t, n_total));
            let mut col = 0;
            for (modality, weight) in modalities.iter().zip(self.weights.iter()) {
                match (modality, weight) {
                    (Modality::Stack(x), ModalityWeights::Stack(ws)) => {
                        let (_, d, n) = x.dim();
                        if ws.dim().0 != d || ws.dim().1 != n {
                            return Err(EstimationError::ChannelDimensionMismatch {
                                left: d * n,
                                right: ws.dim().0 * ws.dim().1,
                            });
                        }
                        for subj in 0..n {
                            let wcol = ws.slice(s![.., subj, comp]).to_owned();
                            proj.column_mut(col)
                                .assign(&x.index_axis(Axis(2), subj).dot(&wcol));
                            col += 1;
                        }
                    }
                    (Modality::Features(f), ModalityWeights::Features(wf)) => {
                        if f.ncols() != wf.nrows() {
                            return Err(EstimationError::ChannelDimensionMismatch {
                                left: f.ncols(),
                                right: wf.nrows(),
                            });
                        }
                        proj.column_mut(col).assign(&f.dot(&wf.column(comp)));
                        col += 1;
                    }
                    _ => {
                        return Err(EstimationError::InvalidConfiguration(
                            "modality kinds do not match the fitted weights".into(),
                        ))
                    }
                }
            }
            correlations[comp] = average_pairwise_correlation(proj.view())?;
        }
        Ok(correlations)
    }
}

/// Fit correlated component analysis (inter-subject correlation) on a
/// T x D x N stack.
///
/// Splits the pooled covariance into within-subject and between-subject
/// parts and solves `Rw^-1 Rb` for its largest eigenvalues. The reported
/// ISC values approximate the average pairwise correlation of the projected
/// subjects.
pub fn fit_correlated_components(
    stack: &SignalStack,
    n_components: usize,
) -> Result<CorrelatedComponents> {
    validate_stack(stack, n_components)?;
    let (_, d, n) = stack.dim();
    if n_components > d {
        return Err(EstimationError::RankExceeded {
            requested: n_components,
            available: d,
        });
    }
    let (rw, rb) = within_between_covariances(stack)?;
    let rank = effective_rank(&rw)?;
    let inv_rw = if rank < d {
        pca_regularized_inverse(&rw, rank)?
    } else {
        rw.inv()?
    };
    let (values, vectors) = sorted_eig(&inv_rw.dot(&rb), SortOrder::Descending)?;
    Ok(CorrelatedComponents {
        weights: vectors.slice(s![.., ..n_components]).mapv(|v| v.re),
        isc: values.slice(s![..n_components]).mapv(|v| v.re),
    })
}

fn within_between_covariances(stack: &SignalStack) -> Result<(Array2<f64>, Array2<f64>)> {
    let (_, d, n) = stack.dim();
    let mut rw = Array2::zeros((d, d));
    for subj in 0..n {
        rw += &empirical_covariance(stack.index_axis(Axis(2), subj))?;
    }
    let mean = stack.sum_axis(Axis(2)) / n as f64;
    let rt = empirical_covariance(mean.view())? * (n as f64).powi(2);
    let rb = (&rt - &rw) / (n as f64 - 1.0);
    Ok((rw, rb))
}

impl CorrelatedComponents {
    /// Score unseen data through the fitted filters: per component, the
    /// ratio of projected between-subject to within-subject variance.
    pub fn apply(&self, stack: &SignalStack) -> Result<Array1<f64>> {
        let (_, d, _) = stack.dim();
        if d != self.weights.nrows() {
            return Err(EstimationError::ChannelDimensionMismatch {
                left: d,
                right: self.weights.nrows(),
            });
        }
        let (rw, rb) = within_between_covariances(stack)?;
        let k = self.weights.ncols();
        let mut isc = Array1::zeros(k);
        for comp in 0..k {
            let w = self.weights.column(comp).to_owned();
            let within = w.dot(&rw.dot(&w));
            isc[comp] = if within.abs() > f64::EPSILON {
                w.dot(&rb.dot(&w)) / within
            } else {
                0.0
            };
        }
        Ok(isc)
    }
}

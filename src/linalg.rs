//! Sorted eigendecompositions, PCA-regularized inversion, and FIR design
//! matrices.
//!
//! The general eigensolver keeps its complex output: generalized
//! eigendecompositions of asymmetric covariance products may yield complex
//! pairs, and downstream users decide explicitly where the real part is
//! taken.

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{c64, Eig, Eigh, UPLO};
use serde::{Deserialize, Serialize};

use crate::constants::{RANK_TOLERANCE, SYMMETRY_TOLERANCE};
use crate::error::{EstimationError, Result};

/// Ordering applied to eigenvalues (and, identically, to eigenvector
/// columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smallest eigenvalue first.
    Ascending,
    /// Largest eigenvalue first.
    Descending,
    /// Keep the backend's order. Explicit no-op; emits a warning.
    Unsorted,
}

/// Validate that `m` is square and symmetric within tolerance.
fn check_symmetric(m: &ArrayView2<f64>) -> Result<()> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(EstimationError::NotSquare { rows, cols });
    }
    let scale = m.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
    let mut max_asymmetry = 0.0f64;
    for i in 0..rows {
        for j in (i + 1)..cols {
            max_asymmetry = max_asymmetry.max((m[(i, j)] - m[(j, i)]).abs());
        }
    }
    if max_asymmetry > SYMMETRY_TOLERANCE * scale {
        return Err(EstimationError::NotSymmetric {
            dim: rows,
            max_asymmetry,
        });
    }
    Ok(())
}

/// Rebuild `m` with standard strides when any axis has stride 0.
///
/// ndarray canonicalizes axes of length 1 to stride 0 (e.g. after slicing a
/// 1x1 block out of a larger matrix), which the LAPACK layout check in
/// ndarray-linalg rejects as `InvalidStride`. The copy holds identical values.
fn standard_strides(m: &Array2<f64>) -> Option<Array2<f64>> {
    if m.strides().contains(&0) {
        Some(
            Array2::from_shape_vec(m.raw_dim(), m.iter().copied().collect())
                .expect("shape and element count agree by construction"),
        )
    } else {
        None
    }
}

/// General eigendecomposition with ranked eigenvalues.
///
/// Eigenvalues are sorted by real part (imaginary part breaks ties) and the
/// eigenvector columns are permuted identically. Complex results are
/// preserved; callers take real parts where their formulation guarantees a
/// real spectrum.
///
/// `SortOrder::Unsorted` returns the backend order unchanged and logs a
/// warning, matching the explicit no-op mode of the reference procedure.
pub fn sorted_eig(m: &Array2<f64>, order: SortOrder) -> Result<(Array1<c64>, Array2<c64>)> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(EstimationError::NotSquare { rows, cols });
    }
    let (values, vectors) = m.eig()?;
    if order == SortOrder::Unsorted {
        log::warn!("sorted_eig called with SortOrder::Unsorted; eigenvalues left in backend order");
        return Ok((values, vectors));
    }
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| {
        let (va, vb) = (values[a], values[b]);
        va.re
            .total_cmp(&vb.re)
            .then_with(|| va.im.total_cmp(&vb.im))
    });
    if order == SortOrder::Descending {
        idx.reverse();
    }
    Ok((values.select(Axis(0), &idx), vectors.select(Axis(1), &idx)))
}

/// Symmetric eigendecomposition with ranked eigenvalues.
///
/// The input must be symmetric within tolerance; the result is fully real.
pub fn sorted_eigh(m: &Array2<f64>, order: SortOrder) -> Result<(Array1<f64>, Array2<f64>)> {
    check_symmetric(&m.view())?;
    // LAPACK returns the symmetric spectrum in ascending order already.
    let (values, vectors) = m.eigh(UPLO::Lower)?;
    match order {
        SortOrder::Ascending => Ok((values, vectors)),
        SortOrder::Descending => {
            let idx: Vec<usize> = (0..values.len()).rev().collect();
            Ok((values.select(Axis(0), &idx), vectors.select(Axis(1), &idx)))
        }
        SortOrder::Unsorted => {
            log::warn!(
                "sorted_eigh called with SortOrder::Unsorted; eigenvalues left in backend order"
            );
            Ok((values, vectors))
        }
    }
}

/// Effective rank of a symmetric matrix: the number of eigenvalues whose
/// magnitude exceeds a relative tolerance.
pub fn effective_rank(m: &Array2<f64>) -> Result<usize> {
    let (values, _) = sorted_eigh(m, SortOrder::Descending)?;
    let max_abs = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if max_abs == 0.0 {
        return Ok(0);
    }
    Ok(values
        .iter()
        .filter(|v| v.abs() > RANK_TOLERANCE * max_abs)
        .count())
}

/// PCA-regularized inverse of a symmetric matrix.
///
/// The inverse is restricted to the top-`rank` eigenvalue/eigenvector
/// subspace, discarding small eigenvalues dominated by noise. `rank` must be
/// between 1 and the number of numerically non-zero eigenvalues; requesting
/// more fails with [`EstimationError::SingularCovariance`] rather than
/// silently amplifying noise directions.
pub fn pca_regularized_inverse(m: &Array2<f64>, rank: usize) -> Result<Array2<f64>> {
    let dim = m.nrows();
    if rank == 0 || rank > dim {
        return Err(EstimationError::InvalidConfiguration(format!(
            "regularization rank {rank} must be between 1 and the matrix dimension {dim}"
        )));
    }
    let (values, vectors) = sorted_eigh(m, SortOrder::Descending)?;
    let max_abs = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let nonzero = values
        .iter()
        .filter(|v| v.abs() > RANK_TOLERANCE * max_abs)
        .count();
    if rank > nonzero {
        return Err(EstimationError::SingularCovariance { rank: nonzero, dim });
    }
    let leading = vectors.slice(s![.., ..rank]);
    let inv_values = values.slice(s![..rank]).mapv(|v| 1.0 / v);
    Ok(leading.dot(&Array2::from_diag(&inv_values)).dot(&leading.t()))
}

/// Build the Toeplitz design matrix of a length-`lag` FIR filter applied to
/// `signal`.
///
/// Row `t` of the causal matrix holds `[x(t), x(t-1), ..., x(t-lag+1)]`; the
/// non-causal variant centers the taps around `t` and therefore requires an
/// odd `lag`. Samples outside the recording are zero.
pub fn convolution_matrix(lag: usize, signal: ArrayView1<f64>, causal: bool) -> Result<Array2<f64>> {
    if lag == 0 {
        return Err(EstimationError::InvalidConfiguration(
            "FIR lag must be at least 1".into(),
        ));
    }
    if !causal && lag % 2 == 0 {
        return Err(EstimationError::EvenNonCausalLag(lag));
    }
    let t_len = signal.len();
    // Causal taps look back [0, lag); non-causal taps span [-half, half].
    let shift = if causal { 0 } else { (lag - 1) / 2 };
    let mut design = Array2::zeros((t_len, lag));
    for t in 0..t_len {
        for j in 0..lag {
            let src = t as isize + shift as isize - j as isize;
            if src >= 0 && (src as usize) < t_len {
                design[(t, j)] = signal[src as usize];
            }
        }
    }
    Ok(design)
}

/// Joint spatio-temporal design matrix for a multi-channel signal.
///
/// Concatenates the per-channel convolution matrices horizontally, producing
/// a T x (D * lag) block Hankel matrix.
pub fn block_hankel(signal: ArrayView2<f64>, lag: usize, causal: bool) -> Result<Array2<f64>> {
    let blocks = signal
        .columns()
        .into_iter()
        .map(|col| convolution_matrix(lag, col, causal))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    concatenate(Axis(1), &views).map_err(|e| {
        EstimationError::InvalidConfiguration(format!("block Hankel concatenation failed: {e}"))
    })
}

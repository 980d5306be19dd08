// src/components.rs

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{PcaError, Result};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};

/// Largest total variance of `covariance` that is still indistinguishable from zero.
///
/// Scales with the magnitude of the data: `eps * n_features * max(max |C_ij|, mean·mean / n_features)`.
/// Identical frames leave round-off in the covariance of order `eps^2 * |x|^2`, far below
/// this bound, while genuine motion at any coordinate scale stays above it.
pub fn degenerate_variance_tolerance(covariance: &Array2<f64>, mean: ArrayView1<f64>) -> f64 {
    let n_features = covariance.nrows();
    if n_features == 0 {
        return 0.0;
    }
    let max_entry = covariance.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let mean_scale = mean.dot(&mean) / n_features as f64;
    f64::EPSILON * n_features as f64 * max_entry.max(mean_scale)
}

/// Eigen-decomposition results of a covariance matrix, sorted by descending variance.
#[derive(Debug, Clone)]
pub struct ComponentSet {
    /// Unit-norm principal components, one per column.
    /// Shape: `(n_features, k_components)`
    pub components: Array2<f64>,
    /// Eigenvalue of each kept component, descending.
    /// Shape: `(k_components)`
    pub variance: Array1<f64>,
    /// `cumulated_variance[k]` is the fraction of the total variance explained by components `0..=k`.
    /// The denominator is the sum over the full spectrum, also when components are truncated.
    /// Shape: `(k_components)`
    pub cumulated_variance: Array1<f64>,
    /// Sum of all eigenvalues of the covariance matrix.
    pub total_variance: f64,
}

/// Diagonalizes `covariance` and keeps the leading `n_components` eigenpairs (all when `None`).
///
/// `tolerance` is the total variance at or below which the matrix counts as
/// degenerate, usually from [`degenerate_variance_tolerance`].
///
/// Eigenpairs are ordered by descending eigenvalue with a stable sort, so tied
/// eigenvalues keep the ascending order the solver returned them in. Eigenvalues
/// slightly below zero from round-off are clamped to `0.0`.
///
/// # Errors
/// - `InvalidInput` if `covariance` is not square or `n_components` is `Some(0)`.
/// - `LinearAlgebra` if the eigendecomposition fails.
/// - `DegenerateCovariance` if the total variance is zero.
pub fn extract_components(
    covariance: &Array2<f64>,
    n_components: Option<usize>,
    tolerance: f64,
) -> Result<ComponentSet> {
    let n_features = covariance.nrows();
    if covariance.ncols() != n_features {
        return Err(PcaError::invalid_input(format!(
            "covariance matrix must be square, got {}x{}",
            covariance.nrows(),
            covariance.ncols()
        )));
    }
    if n_components == Some(0) {
        return Err(PcaError::invalid_input("n_components must be greater than 0"));
    }

    let backend = LinAlgBackendProvider::<f64>::new();
    let eigh = backend
        .eigh_upper(covariance)
        .map_err(PcaError::LinearAlgebra)?;

    let mut eig_pairs: Vec<(f64, usize)> = eigh
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(column, &value)| (value.max(0.0), column))
        .collect();
    eig_pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let total_variance: f64 = eig_pairs.iter().map(|(value, _)| value).sum();
    if !total_variance.is_finite() || total_variance <= tolerance {
        warn!(
            "Covariance matrix of dimension {} has total variance {:e} (tolerance {:e}); no components can be ranked.",
            n_features, total_variance, tolerance
        );
        return Err(PcaError::DegenerateCovariance { total_variance });
    }

    let requested = n_components.unwrap_or(n_features);
    if requested > n_features {
        debug!(
            "Requested {} components but the covariance has dimension {}; keeping {}.",
            requested, n_features, n_features
        );
    }
    let final_rank = requested.min(n_features);

    let mut components = Array2::<f64>::zeros((n_features, final_rank));
    let mut variance = Array1::<f64>::zeros(final_rank);
    for (i, &(value, column)) in eig_pairs.iter().take(final_rank).enumerate() {
        let eig_vec = eigh.eigenvectors.column(column);
        let norm = eig_vec.dot(&eig_vec).sqrt();
        let mut target = components.column_mut(i);
        if norm > 1e-9 {
            target.assign(&(&eig_vec / norm));
        } else {
            target.fill(0.0);
        }
        variance[i] = value;
    }

    let mut cumulated_variance = variance.clone();
    cumulated_variance.accumulate_axis_inplace(Axis(0), |&prev, curr| *curr += prev);
    cumulated_variance /= total_variance;

    debug!(
        "Kept {} of {} components, explaining {:.4} of the total variance {:e}",
        final_rank,
        n_features,
        cumulated_variance.iter().next_back().copied().unwrap_or(0.0),
        total_variance
    );

    Ok(ComponentSet {
        components,
        variance,
        cumulated_variance,
        total_variance,
    })
}

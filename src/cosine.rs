// src/cosine.rs

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;

use crate::error::{PcaError, Result};

/// Composite Simpson integral of unit-spaced samples.
///
/// With an odd number of samples this is the plain composite rule. With an even
/// number the last (or first) interval cannot be covered by a parabola, so the
/// result averages "Simpson on the first n-1 samples + trapezoid on the last interval"
/// and "trapezoid on the first interval + Simpson on the last n-1 samples".
pub fn simpson(samples: ArrayView1<f64>) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    if n % 2 == 1 {
        return simpson_odd(samples);
    }
    let head = simpson_odd(samples.slice(ndarray::s![..n - 1]))
        + 0.5 * (samples[n - 2] + samples[n - 1]);
    let tail = 0.5 * (samples[0] + samples[1]) + simpson_odd(samples.slice(ndarray::s![1..]));
    0.5 * (head + tail)
}

// Requires an odd sample count; a single sample integrates to zero.
fn simpson_odd(samples: ArrayView1<f64>) -> f64 {
    let n = samples.len();
    let mut total = 0.0;
    let mut i = 0;
    while i + 2 < n {
        total += samples[i] + 4.0 * samples[i + 1] + samples[i + 2];
        i += 2;
    }
    total / 3.0
}

/// Measures the cosine content of column `component` of a projection.
///
/// Cosine content compares a projected time series with a half-cosine of
/// `component + 1` half periods over the series length `T`:
///
/// `(2 / T) * (∫ cos(π t (component + 1) / T) s(t) dt)^2 / ∫ s(t)^2 dt`
///
/// Values near 1 mean the projection looks like random diffusion along that
/// component (poor sampling); values near 0 indicate better convergence.
/// See B. Hess, "Convergence of sampling in protein simulations", Phys. Rev. E 65, 031910 (2002).
///
/// * `projection` - Shape `(n_frames, n_components)`, as returned by `transform`.
/// * `component` - Column to analyze.
///
/// # Errors
/// - `InvalidInput` if `component` is not a column of `projection`.
/// - `EmptySeries` if the series has fewer than 2 samples or zero energy.
pub fn cosine_content(projection: ArrayView2<f64>, component: usize) -> Result<f64> {
    if component >= projection.ncols() {
        return Err(PcaError::invalid_input(format!(
            "component index {} out of range for a projection with {} components",
            component,
            projection.ncols()
        )));
    }
    let series = projection.index_axis(Axis(1), component);
    let length = series.len();
    if length < 2 {
        return Err(PcaError::empty_series(format!(
            "series has {} samples, at least 2 are needed",
            length
        )));
    }

    let energy = simpson(series.mapv(|v| v * v).view());
    if !energy.is_finite() || energy <= 0.0 {
        return Err(PcaError::empty_series(format!(
            "series energy integral is {}",
            energy
        )));
    }

    let period = length as f64;
    let frequency = (component + 1) as f64;
    let weighted: Array1<f64> = series
        .iter()
        .enumerate()
        .map(|(t, &value)| (PI * t as f64 * frequency / period).cos() * value)
        .collect();
    let overlap = simpson(weighted.view());

    Ok((2.0 / period) * overlap.powi(2) / energy)
}

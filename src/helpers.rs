// src/helpers.rs

//! Small numeric helpers shared by the PCA engine and the limit estimator.

use ndarray::{Array, Array1, ArrayView1, ArrayView2, Axis, Dimension};

/// Clamps every element of `values` into `[lower, upper]`; a `None` bound is a no-op.
///
/// Elements that do not compare (NaN) are replaced by the bound being applied, so
/// `bound(NaN, Some(1.0), Some(250.0))` is `1.0` and `bound(NaN, None, Some(1.0))` is `1.0`.
/// The limit estimator relies on this to turn degenerate statistics (0/0) into usable
/// degrees of freedom and probabilities.
pub fn bound<D: Dimension>(
    values: &Array<f64, D>,
    lower: Option<f64>,
    upper: Option<f64>,
) -> Array<f64, D> {
    values.mapv(|v| bound_scalar(v, lower, upper))
}

/// Scalar form of [`bound`].
pub fn bound_scalar(value: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    let mut v = value;
    if let Some(lo) = lower {
        if !(v >= lo) {
            v = lo;
        }
    }
    if let Some(hi) = upper {
        if !(v <= hi) {
            v = hi;
        }
    }
    v
}

/// Per-column standard deviation, normalized by `n - ddof`.
///
/// No guard against `n <= ddof`: the result is then NaN or infinite, matching the
/// behaviour the limit estimator expects for degenerate calibration sets.
pub fn column_std(matrix: ArrayView2<f64>, ddof: usize) -> Array1<f64> {
    let n = matrix.nrows();
    let denom = n as f64 - ddof as f64;
    matrix.map_axis(Axis(0), |column| {
        let mean = column.sum() / n as f64;
        let ss: f64 = column.iter().map(|&x| (x - mean).powi(2)).sum();
        (ss / denom).sqrt()
    })
}

/// Per-column arithmetic mean. NaN for an empty matrix.
pub fn column_mean(matrix: ArrayView2<f64>) -> Array1<f64> {
    let n = matrix.nrows() as f64;
    matrix.map_axis(Axis(0), |column| column.sum() / n)
}

/// Percentile `q` (in `[0, 100]`) of a column using midpoint interpolation:
/// the mean of the two order statistics around the fractional rank `q/100 * (n-1)`.
///
/// A column containing NaN yields NaN.
pub fn percentile_midpoint(column: ArrayView1<f64>, q: f64) -> f64 {
    if column.is_empty() || column.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted: Vec<f64> = column.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    (sorted[lo] + sorted[hi]) / 2.0
}

/// Per-column median (the 50th midpoint percentile).
pub fn column_median(matrix: ArrayView2<f64>) -> Array1<f64> {
    column_percentile(matrix, 50.0)
}

/// Per-column midpoint percentile, see [`percentile_midpoint`].
pub fn column_percentile(matrix: ArrayView2<f64>, q: f64) -> Array1<f64> {
    matrix.map_axis(Axis(0), |column| percentile_midpoint(column, q))
}

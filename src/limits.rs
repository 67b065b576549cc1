// src/limits.rs

//! Data-driven distance limits: statistical parameters of the Q and T2 distance
//! distributions of the calibration set, and the probability thresholds derived from them.

use std::fmt;
use std::str::FromStr;

use log::trace;
use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::Deserialize;
use statrs::distribution::{ChiSquared, Continuous, ContinuousCDF};

use crate::error::{FormatError, SimcaError};
use crate::helpers::{bound, bound_scalar, column_mean, column_median, column_percentile, column_std};
use crate::pca::Projection;
use crate::simca::SimcaParameters;

/// Lowest and highest degrees of freedom used when combining the Q and T2 limits.
const DOF_RANGE: (f64, f64) = (1.0, 250.0);
/// Upper bound on the robust degrees-of-freedom estimate.
const ROBUST_DOF_MAX: f64 = 100.0;

/// Scheme used to estimate location and degrees of freedom of a distance distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum LimitType {
    /// Median and interquartile range.
    #[serde(rename = "DDROBUST")]
    DdRobust,
    /// Mean and standard deviation.
    #[serde(rename = "DDMOMENTS")]
    DdMoments,
}

impl LimitType {
    pub const ALL: [LimitType; 2] = [LimitType::DdRobust, LimitType::DdMoments];

    /// Name used in stored models.
    pub fn name(self) -> &'static str {
        match self {
            LimitType::DdRobust => "DDROBUST",
            LimitType::DdMoments => "DDMOMENTS",
        }
    }

    /// Numeric code offered to form choices.
    pub fn value(self) -> u8 {
        match self {
            LimitType::DdRobust => 1,
            LimitType::DdMoments => 2,
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LimitType {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LimitType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| FormatError::UnknownLimitType(s.to_string()))
    }
}

/// Location (`u0`), degrees of freedom (`nu`) and calibration sample count (`nobj`) of one
/// distance type, one entry per component count.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitParameters {
    pub u0: Array1<f64>,
    pub nu: Array1<f64>,
    pub nobj: usize,
}

impl LimitParameters {
    /// Estimates the parameters from a distance matrix (rows = calibration samples,
    /// columns = component counts).
    pub fn generate(distances: ArrayView2<f64>, limit_type: LimitType) -> Result<Self, SimcaError> {
        match limit_type {
            LimitType::DdMoments => Ok(Self::from_moments(distances)),
            LimitType::DdRobust => Self::from_robust(distances),
        }
    }

    fn from_moments(distances: ArrayView2<f64>) -> Self {
        let u0 = column_mean(distances);
        let sd = column_std(distances, 1);
        let nu = Zip::from(&u0).and(&sd).map_collect(|&m, &s| 2.0 * (m / s).powi(2));
        Self { u0, nu, nobj: distances.nrows() }
    }

    fn from_robust(distances: ArrayView2<f64>) -> Result<Self, SimcaError> {
        let mu = column_median(distances);
        let iqr = column_percentile(distances, 75.0) - column_percentile(distances, 25.0);

        // floored at 1: a log and a fractional power follow
        let ratio = Zip::from(&iqr).and(&mu).map_collect(|&s, &m| 2.68631 / (s / m));
        let temp = bound(&ratio, Some(1.0), None);
        let raw_nu = temp.mapv(|t| (1.380948 * t.ln()).powf(1.185785).exp().round_ties_even());
        let nu = bound(&raw_nu, None, Some(ROBUST_DOF_MAX));

        let mut u0 = Array1::<f64>::zeros(nu.len());
        for (j, &n) in nu.iter().enumerate() {
            let q50 = chi2_ppf(0.50, n)?;
            let q75 = chi2_ppf(0.75, n)?;
            let q25 = chi2_ppf(0.25, n)?;
            u0[j] = 0.5 * n * (mu[j] / q50 + iqr[j] / (q75 - q25));
        }
        Ok(Self { u0, nu, nobj: distances.nrows() })
    }
}

/// Thresholds of one distance type; every vector has one entry per component count.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Critical limits for extremes.
    pub extremes: Array1<f64>,
    /// Critical limits for outliers.
    pub outliers: Array1<f64>,
    /// Mean of the distance, or its robust estimate for [`LimitType::DdRobust`].
    pub mean: Array1<f64>,
    /// Degrees of freedom, integral and within `[1, 250]`.
    pub dof: Array1<f64>,
}

impl Limits {
    /// The four rows (extremes, outliers, mean, dof) as a `4 x n_comp` matrix.
    pub fn as_matrix(&self) -> Array2<f64> {
        let n = self.mean.len();
        let mut m = Array2::<f64>::zeros((4, n));
        m.row_mut(0).assign(&self.extremes);
        m.row_mut(1).assign(&self.outliers);
        m.row_mut(2).assign(&self.mean);
        m.row_mut(3).assign(&self.dof);
        m
    }
}

/// Q and T2 limits of a calibrated model.
///
/// The threshold of each distance depends on the degrees of freedom of *both* distances.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceLimits {
    parameters: SimcaParameters,
    q: Limits,
    t2: Limits,
    q_params: LimitParameters,
    t2_params: LimitParameters,
}

impl DistanceLimits {
    /// Estimates Q and T2 limits from a calibration projection.
    pub fn generate(projection: &Projection, parameters: SimcaParameters) -> Result<Self, SimcaError> {
        let distances = projection.distances();
        let q_params = LimitParameters::generate(distances.q.view(), parameters.limit_type())?;
        let t2_params = LimitParameters::generate(distances.t2.view(), parameters.limit_type())?;
        let (q, t2) = data_driven_limits(&q_params, &t2_params, &parameters)?;
        trace!("Q limits: {:?}", q);
        trace!("T2 limits: {:?}", t2);
        Ok(Self { parameters, q, t2, q_params, t2_params })
    }

    /// Reassembles stored limits; `parameters` come from the owning model.
    pub fn from_parts(
        parameters: SimcaParameters,
        q: Limits,
        t2: Limits,
        q_params: LimitParameters,
        t2_params: LimitParameters,
    ) -> Self {
        Self { parameters, q, t2, q_params, t2_params }
    }

    pub fn parameters(&self) -> &SimcaParameters {
        &self.parameters
    }

    pub fn q(&self) -> &Limits {
        &self.q
    }

    pub fn t2(&self) -> &Limits {
        &self.t2
    }

    pub fn q_params(&self) -> &LimitParameters {
        &self.q_params
    }

    pub fn t2_params(&self) -> &LimitParameters {
        &self.t2_params
    }

    /// Number of component counts the limits cover.
    pub fn n_comp(&self) -> usize {
        self.q.mean.len()
    }

    /// Probability for every row of `projection` to come from the calibration population,
    /// for every component count. Shape: (n_rows, projection.n_comp()).
    ///
    /// # Errors
    /// Returns an error if the projection has more components than the limits cover.
    pub fn probabilities(&self, projection: &Projection) -> Result<Array2<f64>, SimcaError> {
        let n_comp = projection.n_comp();
        if n_comp > self.n_comp() {
            return Err(SimcaError::ComponentCountOutOfRange { requested: n_comp, maximum: self.n_comp() });
        }
        let alpha = self.parameters.alpha();
        let distances = projection.distances();
        let mut probabilities = Array2::<f64>::zeros((projection.n_samples(), n_comp));

        for i in 0..n_comp {
            let h0 = self.t2.mean[i];
            let nh = self.t2.dof[i].round_ties_even();
            let q0 = self.q.mean[i];
            let nq = self.q.dof[i].round_ties_even();
            let chi2 = chi_squared(nh + nq)?;

            Zip::from(probabilities.column_mut(i))
                .and(distances.t2.column(i))
                .and(distances.q.column(i))
                .for_each(|p, &h, &q| {
                    let statistic = nh * h / h0 + nq * q / q0;
                    let tail = 0.5 * (1.0 - chi2_cdf(&chi2, statistic)) / alpha;
                    *p = bound_scalar(tail, None, Some(1.0));
                });
        }
        Ok(probabilities)
    }
}

fn data_driven_limits(
    q_params: &LimitParameters,
    t2_params: &LimitParameters,
    parameters: &SimcaParameters,
) -> Result<(Limits, Limits), SimcaError> {
    let (lo, hi) = DOF_RANGE;
    let nq = bound(&q_params.nu.mapv(f64::round_ties_even), Some(lo), Some(hi));
    let nh = bound(&t2_params.nu.mapv(f64::round_ties_even), Some(lo), Some(hi));

    let extremes_p = 1.0 - parameters.alpha();
    let outliers_p = (1.0 - parameters.gamma()).powf(1.0 / q_params.nobj as f64);

    let n = nq.len();
    let mut dd_extremes = Array1::<f64>::zeros(n);
    let mut dd_outliers = Array1::<f64>::zeros(n);
    for j in 0..n {
        let dof = nq[j] + nh[j];
        dd_extremes[j] = chi2_ppf(extremes_p, dof)?;
        dd_outliers[j] = chi2_ppf(outliers_p, dof)?;
    }

    let scaled = |dd: &Array1<f64>, dof: &Array1<f64>, u0: &Array1<f64>| dd / dof * u0;
    let q = Limits {
        extremes: scaled(&dd_extremes, &nq, &q_params.u0),
        outliers: scaled(&dd_outliers, &nq, &q_params.u0),
        mean: q_params.u0.clone(),
        dof: nq,
    };
    let t2 = Limits {
        extremes: scaled(&dd_extremes, &nh, &t2_params.u0),
        outliers: scaled(&dd_outliers, &nh, &t2_params.u0),
        mean: t2_params.u0.clone(),
        dof: nh,
    };
    Ok((q, t2))
}

fn chi_squared(dof: f64) -> Result<ChiSquared, SimcaError> {
    ChiSquared::new(dof).map_err(|e| SimcaError::Distribution { dof, reason: e.to_string() })
}

/// CDF of `dist` at `x`; NaN in, NaN out.
fn chi2_cdf(dist: &ChiSquared, x: f64) -> f64 {
    if x.is_nan() {
        f64::NAN
    } else if x <= 0.0 {
        0.0
    } else if x == f64::INFINITY {
        1.0
    } else {
        dist.cdf(x)
    }
}

/// Quantile function of the chi-squared distribution with `dof` degrees of freedom.
///
/// `p <= 0` gives 0 and `p >= 1` gives infinity. The library estimate is polished with
/// Newton steps on the CDF, so thresholds are accurate to a few ulps.
pub fn chi2_ppf(p: f64, dof: f64) -> Result<f64, SimcaError> {
    if p.is_nan() {
        return Ok(f64::NAN);
    }
    if p <= 0.0 {
        return Ok(0.0);
    }
    if p >= 1.0 {
        return Ok(f64::INFINITY);
    }
    let dist = chi_squared(dof)?;
    let mut x = dist.inverse_cdf(p);
    if !x.is_finite() || x <= 0.0 {
        x = dof.max(f64::MIN_POSITIVE);
    }
    for _ in 0..50 {
        let density = dist.pdf(x);
        if !(density > 0.0) || !density.is_finite() {
            break;
        }
        let step = (dist.cdf(x) - p) / density;
        let mut next = x - step;
        if next <= 0.0 {
            next = x / 2.0;
        }
        if (next - x).abs() <= 4.0 * f64::EPSILON * x {
            x = next;
            break;
        }
        x = next;
    }
    Ok(x)
}

// Principal component analysis (PCA) engine for SIMCA class models

use ndarray::{s, Array1, Array2, ArrayView2, Axis, Zip};
use log::{debug, trace};

use crate::error::SimcaError;
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};

/// Eigendecomposition of the covariance (or correlation, if the caller scaled) matrix of a
/// preprocessed sample matrix.
///
/// The basis keeps the matrix it was fitted on, so a model can be re-projected at a
/// different component count without touching the raw calibration data.
///
/// Invariants: `eigenvalues` are non-negative and sorted in descending order, column `i` of
/// `eigenvectors` belongs to `eigenvalues[i]`, and there is one eigenvalue per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaBasis {
    /// The (preprocessed) matrix the basis was fitted on.
    /// Shape: (n_samples, n_features)
    matrix: Array2<f64>,
    /// Covariance of the columns of `matrix`.
    /// Shape: (n_features, n_features)
    covariance: Array2<f64>,
    /// Shape: (n_features)
    eigenvalues: Array1<f64>,
    /// Loadings, one column per component.
    /// Shape: (n_features, n_features)
    eigenvectors: Array2<f64>,
    /// `true`: covariance normalized by N, `false`: by N-1.
    bias: bool,
}

impl PcaBasis {
    /// Fits the basis to `matrix` (rows = samples, columns = features).
    ///
    /// The covariance is implicitly mean centered; any further preprocessing (centering,
    /// scaling) is the caller's job. Eigenvalues are forced non-negative to absorb
    /// rounding noise around zero, then sorted in descending order together with their
    /// eigenvectors.
    ///
    /// # Errors
    /// Returns an error if the matrix has zero samples or zero features, or if the
    /// eigendecomposition fails.
    pub fn fit(matrix: Array2<f64>, bias: bool) -> Result<Self, SimcaError> {
        let (n_samples, n_features) = matrix.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(SimcaError::EmptyMatrix { rows: n_samples, cols: n_features });
        }
        debug!(
            "Fitting PCA basis on {}x{} matrix (covariance normalized by {}).",
            n_samples,
            n_features,
            if bias { "N" } else { "N-1" }
        );

        let covariance = covariance(matrix.view(), bias);
        let decomposition = LinAlgBackendProvider::<f64>::new()
            .eigh_upper(&covariance)
            .map_err(|e| SimcaError::Eigendecomposition(e.to_string()))?;

        let magnitudes = decomposition.eigenvalues.mapv(f64::abs);
        let order = descending_order(&magnitudes);
        let eigenvalues = order.iter().map(|&i| magnitudes[i]).collect::<Array1<f64>>();
        let eigenvectors = decomposition.eigenvectors.select(Axis(1), &order);
        trace!("PCA eigenvalues: {:?}", eigenvalues);

        Ok(Self { matrix, covariance, eigenvalues, eigenvectors, bias })
    }

    /// Rebuilds a basis from stored parts, checking that their shapes agree.
    pub fn from_parts(
        matrix: Array2<f64>,
        covariance: Array2<f64>,
        eigenvalues: Array1<f64>,
        eigenvectors: Array2<f64>,
        bias: bool,
    ) -> Result<Self, SimcaError> {
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(SimcaError::NonSquareCovariance { rows, cols });
        }
        if eigenvectors.dim() != (rows, rows) || eigenvalues.len() != rows {
            return Err(SimcaError::DimensionMismatch {
                expected: rows,
                found: eigenvalues.len(),
            });
        }
        if matrix.ncols() != rows {
            return Err(SimcaError::DimensionMismatch { expected: rows, found: matrix.ncols() });
        }
        Ok(Self { matrix, covariance, eigenvalues, eigenvectors, bias })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn eigenvectors(&self) -> &Array2<f64> {
        &self.eigenvectors
    }

    pub fn bias(&self) -> bool {
        self.bias
    }

    /// Number of features, which is also the total number of components.
    pub fn n_features(&self) -> usize {
        self.eigenvectors.nrows()
    }

    pub fn total_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Fraction of the total variance carried by each component. NaN if the total is zero.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.eigenvalues.sum();
        self.eigenvalues.mapv(|v| v / total)
    }

    /// Projects `matrix` onto the `n_comp` leading components.
    ///
    /// `n_comp` is clamped to the number of available components. Q and T2 distances are
    /// computed for every component count `1..=n_comp` in the same pass.
    ///
    /// # Errors
    /// Returns an error if the column count of `matrix` differs from the basis's feature
    /// count, or if `n_comp` is zero.
    pub fn project(&self, matrix: ArrayView2<f64>, n_comp: usize) -> Result<Projection, SimcaError> {
        if matrix.ncols() != self.n_features() {
            return Err(SimcaError::DimensionMismatch {
                expected: self.n_features(),
                found: matrix.ncols(),
            });
        }
        if n_comp < 1 {
            return Err(SimcaError::InvalidComponentCount);
        }
        let n_comp = n_comp.min(self.total_components());
        debug!("Projecting {} rows onto {} components.", matrix.nrows(), n_comp);

        let loadings = self.eigenvectors.slice(s![.., ..n_comp]);
        let scores = matrix.dot(&loadings);
        let residuals = &matrix - &scores.dot(&loadings.t());
        let distances = self.distances(&scores, &residuals);

        Ok(Projection { scores, residuals, distances })
    }

    /// Column `i` of Q is the residual energy when only components `0..=i` are kept, i.e.
    /// with components `i+1..n_comp` put back into the residual. Column `i` of T2 is the
    /// cumulative eigenvalue-normalized score energy of components `0..=i`.
    fn distances(&self, scores: &Array2<f64>, residuals: &Array2<f64>) -> Distances {
        let (n_rows, n_comp) = scores.dim();
        let mut q = Array2::<f64>::zeros((n_rows, n_comp));
        let mut t2 = Array2::<f64>::zeros((n_rows, n_comp));

        // Walk backwards, re-inserting one component per step.
        let mut res = residuals.clone();
        for i in (0..n_comp).rev() {
            if i + 1 < n_comp {
                let score_col = scores.column(i + 1);
                let loading = self.eigenvectors.column(i + 1);
                for (mut row, &score) in res.axis_iter_mut(Axis(0)).zip(score_col.iter()) {
                    row.scaled_add(score, &loading);
                }
            }
            let energy = res.map_axis(Axis(1), |row| row.dot(&row));
            q.column_mut(i).assign(&energy);
        }

        let mut cumulative = Array1::<f64>::zeros(n_rows);
        for i in 0..n_comp {
            let sd = self.eigenvalues[i].sqrt();
            Zip::from(&mut cumulative)
                .and(scores.column(i))
                .for_each(|acc, &score| *acc += (score / sd).powi(2));
            t2.column_mut(i).assign(&cumulative);
        }

        Distances { q, t2 }
    }
}

/// Result of projecting a matrix onto the leading components of a [`PcaBasis`].
///
/// A projection does not hold its basis; the owner of both (a [`crate::Simca`] model)
/// passes the basis wherever it is needed again.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Shape: (n_rows, n_comp)
    scores: Array2<f64>,
    /// Shape: same as the projected matrix
    residuals: Array2<f64>,
    distances: Distances,
}

/// Q (orthogonal) and T2 (score) distances of a projection, one column per component count.
#[derive(Debug, Clone, PartialEq)]
pub struct Distances {
    /// Column `i`: squared residual distance to the subspace of the first `i+1` components.
    pub q: Array2<f64>,
    /// Column `i`: squared eigenvalue-normalized scores summed over the first `i+1` components.
    pub t2: Array2<f64>,
}

impl Projection {
    /// Rebuilds a projection from stored parts, validated against the basis it belongs to.
    pub fn from_parts(
        scores: Array2<f64>,
        residuals: Array2<f64>,
        distances: Distances,
        basis: &PcaBasis,
    ) -> Result<Self, SimcaError> {
        if residuals.ncols() != basis.n_features() {
            return Err(SimcaError::DimensionMismatch {
                expected: basis.n_features(),
                found: residuals.ncols(),
            });
        }
        if scores.ncols() > basis.total_components() || scores.ncols() == 0 {
            return Err(SimcaError::ComponentCountOutOfRange {
                requested: scores.ncols(),
                maximum: basis.total_components(),
            });
        }
        if residuals.nrows() != scores.nrows()
            || distances.q.dim() != scores.dim()
            || distances.t2.dim() != scores.dim()
        {
            return Err(SimcaError::DimensionMismatch {
                expected: scores.nrows(),
                found: distances.q.nrows(),
            });
        }
        Ok(Self { scores, residuals, distances })
    }

    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    pub fn residuals(&self) -> &Array2<f64> {
        &self.residuals
    }

    pub fn distances(&self) -> &Distances {
        &self.distances
    }

    /// Number of components, the dimension of the projected space.
    pub fn n_comp(&self) -> usize {
        self.scores.ncols()
    }

    pub fn n_samples(&self) -> usize {
        self.scores.nrows()
    }

    /// Frobenius norm of the residual matrix.
    pub fn residual_norm(&self) -> f64 {
        self.residuals.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Sample covariance of the columns of `matrix`, normalized by N (`bias`) or N-1.
fn covariance(matrix: ArrayView2<f64>, bias: bool) -> Array2<f64> {
    let n = matrix.nrows();
    let mean = crate::helpers::column_mean(matrix);
    let centered = &matrix - &mean;
    let denom = if bias { n as f64 } else { n as f64 - 1.0 };
    centered.t().dot(&centered) / denom
}

/// Indices of `values` in descending order; ties keep the reverse of their original order.
fn descending_order(values: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order.reverse();
    order
}

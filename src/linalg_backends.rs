// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use std::error::Error;
use std::marker::PhantomData;

/// Selects the symmetric eigensolver at compile time (see the `backend_*` Cargo features).
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues in the order the backend produced them (ascending for LAPACK).
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns: `eigenvectors.column(i)` belongs to `eigenvalues[i]`.
    pub eigenvectors: Array2<F>,
}

/// Symmetric eigendecomposition reading the upper triangle of `matrix`.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>>;
}

// --- ndarray-linalg (LAPACK) backend ---

use ndarray_linalg::{Eigh as NdLinalgEigh, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

// --- faer backend ---

#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendEigh, EighOutput};
    use ndarray::{Array1, Array2};
    use std::error::Error;

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    impl BackendEigh<f64> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
            let (nrows, ncols) = matrix.dim();
            if nrows != ncols {
                return Err(format!("Matrix must be square for eigendecomposition, got {}x{}.", nrows, ncols).into());
            }
            if matrix.is_empty() {
                return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
            }
            // faer needs a contiguous buffer; covariance matrices are small, so copy.
            let mut mat = faer::Mat::<f64>::zeros(nrows, ncols);
            for ((i, j), &value) in matrix.indexed_iter() {
                mat[(i, j)] = value;
            }
            let eig = mat
                .as_ref()
                .self_adjoint_eigen(faer::Side::Upper)
                .map_err(|e| format!("faer self-adjoint eigendecomposition failed: {:?}", e))?;
            let values = eig.S().column_vector();
            let vectors = eig.U();
            let eigenvalues = Array1::from_shape_fn(nrows, |i| values[i]);
            let eigenvectors = Array2::from_shape_fn((nrows, ncols), |(i, j)| vectors[(i, j)]);
            Ok(EighOutput { eigenvalues, eigenvectors })
        }
    }
}

impl BackendEigh<f64> for LinAlgBackendProvider<f64> {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.eigh_upper(matrix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn provider_decomposes_symmetric_matrix() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let out = LinAlgBackendProvider::<f64>::new().eigh_upper(&m).unwrap();
        let mut values = out.eigenvalues.to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        assert_abs_diff_eq!(values[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 3.0, epsilon = 1e-12);

        // A v = lambda v for every returned pair
        for (i, &lambda) in out.eigenvalues.iter().enumerate() {
            let v = out.eigenvectors.column(i);
            let av = m.dot(&v);
            for k in 0..2 {
                assert_abs_diff_eq!(av[k], lambda * v[k], epsilon = 1e-10);
            }
        }
    }
}

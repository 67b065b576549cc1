use crate::pca::PcaBasis;
use crate::error::SimcaError;

use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn generate_random_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-2.0..2.0))
}

fn centered(matrix: &Array2<f64>) -> Array2<f64> {
    let mean = matrix.mean_axis(Axis(0)).unwrap();
    matrix - &mean
}

#[cfg(test)]
mod basis_tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_square_grid_eigenvalues() -> Result<(), Box<dyn Error>> {
        println!("--- Test: eigenvalues of the +-1 grid ---");
        let data = array![[1.0, 1.0], [1.0, -1.0], [-1.0, 1.0], [-1.0, -1.0]];
        let basis = PcaBasis::fit(data, false)?;
        println!("eigenvalues: {:?}", basis.eigenvalues());
        assert_abs_diff_eq!(basis.eigenvalues()[0], 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis.eigenvalues()[1], 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis.covariance()[[0, 1]], 0.0, epsilon = 1e-12);

        let biased = PcaBasis::fit(basis.matrix().clone(), true)?;
        assert_abs_diff_eq!(biased.eigenvalues()[0], 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_eigenvalues_descending_and_non_negative() -> Result<(), Box<dyn Error>> {
        for seed in [1u64, 7, 42] {
            let basis = PcaBasis::fit(generate_random_data(30, 6, seed), false)?;
            let values = basis.eigenvalues();
            assert!(values.iter().all(|&v| v >= 0.0), "negative eigenvalue for seed {}", seed);
            for w in values.windows(2) {
                assert!(w[0] >= w[1], "eigenvalues not sorted for seed {}: {:?}", seed, values);
            }
            assert_abs_diff_eq!(basis.explained_variance_ratio().sum(), 1.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_eigenvectors_orthonormal_and_diagonalize() -> Result<(), Box<dyn Error>> {
        let basis = PcaBasis::fit(generate_random_data(40, 5, 3), false)?;
        let v = basis.eigenvectors();
        let gram = v.t().dot(v);
        for i in 0..5 {
            for j in 0..5 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-10);
            }
        }
        let rotated = v.t().dot(basis.covariance()).dot(v);
        for i in 0..5 {
            assert_abs_diff_eq!(rotated[[i, i]], basis.eigenvalues()[i], epsilon = 1e-10);
        }
        Ok(())
    }

    #[test]
    fn test_rank_deficient_data_has_zero_eigenvalues() -> Result<(), Box<dyn Error>> {
        // third column = first + second
        let mut data = generate_random_data(20, 3, 11);
        let sum = &data.column(0) + &data.column(1);
        data.column_mut(2).assign(&sum);
        let basis = PcaBasis::fit(data, false)?;
        assert_abs_diff_eq!(basis.eigenvalues()[2], 0.0, epsilon = 1e-10);
        assert!(basis.eigenvalues()[2] >= 0.0);
        Ok(())
    }

    #[test]
    fn test_fit_rejects_empty_matrix() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(PcaBasis::fit(empty, false), Err(SimcaError::EmptyMatrix { rows: 0, cols: 3 })));
    }

    #[test]
    fn test_from_parts_checks_shapes() -> Result<(), Box<dyn Error>> {
        let basis = PcaBasis::fit(generate_random_data(10, 3, 5), false)?;
        let rebuilt = PcaBasis::from_parts(
            basis.matrix().clone(),
            basis.covariance().clone(),
            basis.eigenvalues().clone(),
            basis.eigenvectors().clone(),
            basis.bias(),
        )?;
        assert_eq!(rebuilt, basis);

        let non_square = PcaBasis::from_parts(
            basis.matrix().clone(),
            Array2::zeros((3, 2)),
            basis.eigenvalues().clone(),
            basis.eigenvectors().clone(),
            false,
        );
        assert!(matches!(non_square, Err(SimcaError::NonSquareCovariance { rows: 3, cols: 2 })));

        let short_values = PcaBasis::from_parts(
            basis.matrix().clone(),
            basis.covariance().clone(),
            basis.eigenvalues().slice(s![..2]).to_owned(),
            basis.eigenvectors().clone(),
            false,
        );
        assert!(short_values.is_err());
        Ok(())
    }
}

#[cfg(test)]
mod projection_tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_projection_shapes_and_clamping() -> Result<(), Box<dyn Error>> {
        let data = centered(&generate_random_data(25, 4, 21));
        let basis = PcaBasis::fit(data.clone(), false)?;

        let p = basis.project(data.view(), 2)?;
        assert_eq!(p.scores().dim(), (25, 2));
        assert_eq!(p.residuals().dim(), (25, 4));
        assert_eq!(p.distances().q.dim(), (25, 2));
        assert_eq!(p.distances().t2.dim(), (25, 2));
        assert_eq!(p.n_comp(), 2);
        assert_eq!(p.n_samples(), 25);

        let clamped = basis.project(data.view(), 99)?;
        assert_eq!(clamped.n_comp(), 4);
        Ok(())
    }

    #[test]
    fn test_projection_rejects_bad_input() -> Result<(), Box<dyn Error>> {
        let basis = PcaBasis::fit(generate_random_data(10, 3, 2), false)?;
        let wrong = generate_random_data(4, 5, 2);
        assert!(matches!(
            basis.project(wrong.view(), 2),
            Err(SimcaError::DimensionMismatch { expected: 3, found: 5 })
        ));
        assert!(matches!(
            basis.project(basis.matrix().view(), 0),
            Err(SimcaError::InvalidComponentCount)
        ));
        Ok(())
    }

    #[test]
    fn test_q_decreases_and_t2_increases_with_components() -> Result<(), Box<dyn Error>> {
        let data = centered(&generate_random_data(30, 5, 8));
        let basis = PcaBasis::fit(data.clone(), false)?;
        let p = basis.project(data.view(), 5)?;
        let q = &p.distances().q;
        let t2 = &p.distances().t2;
        for row in 0..30 {
            for i in 1..5 {
                assert!(q[[row, i]] <= q[[row, i - 1]] + 1e-12);
                assert!(t2[[row, i]] >= t2[[row, i - 1]] - 1e-12);
            }
            // all components kept: nothing left in the residual
            assert_abs_diff_eq!(q[[row, 4]], 0.0, epsilon = 1e-10);
        }
        assert_abs_diff_eq!(p.residual_norm(), 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_q_matches_residual_of_truncated_projection() -> Result<(), Box<dyn Error>> {
        let data = centered(&generate_random_data(15, 4, 13));
        let basis = PcaBasis::fit(data.clone(), false)?;
        let full = basis.project(data.view(), 3)?;
        for k in 1..=3 {
            let truncated = basis.project(data.view(), k)?;
            let direct = truncated.residuals().map_axis(Axis(1), |r| r.dot(&r));
            for row in 0..15 {
                assert_abs_diff_eq!(full.distances().q[[row, k - 1]], direct[row], epsilon = 1e-10);
                assert_abs_diff_eq!(
                    full.distances().t2[[row, k - 1]],
                    truncated.distances().t2[[row, k - 1]],
                    epsilon = 1e-10
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_t2_of_calibration_scores_averages_component_count() -> Result<(), Box<dyn Error>> {
        // mean of sum_i (t_i^2 / lambda_i) over the calibration set is k * (n-1) / n
        let n = 50;
        let data = centered(&generate_random_data(n, 4, 99));
        let basis = PcaBasis::fit(data.clone(), false)?;
        let p = basis.project(data.view(), 3)?;
        let mean_t2 = p.distances().t2.mean_axis(Axis(0)).unwrap();
        for k in 0..3 {
            assert_abs_diff_eq!(mean_t2[k], (k + 1) as f64 * (n - 1) as f64 / n as f64, epsilon = 1e-9);
        }
        Ok(())
    }
}

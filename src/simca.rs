// src/simca.rs

//! SIMCA (Soft Independent Modelling of Class Analogy) one-class model.
//!
//! Further reading:
//! - <https://mdatools.com/docs/simca.html>
//! - <https://doi.org/10.1002/cem.2506>

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};

use crate::error::SimcaError;
use crate::helpers::{column_mean, column_std};
use crate::limits::{DistanceLimits, LimitType};
use crate::pca::{PcaBasis, Projection};

/// Tunable parameters of a SIMCA model.
///
/// Every constructor returns a cleaned value: `alpha` and `gamma` are clamped into
/// `[0, 1]` (NaN becomes 0). The component count is clamped against the calibration data
/// by [`SimcaParameters::clamped_to`] before a model stores the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimcaParameters {
    alpha: f64,
    gamma: f64,
    n_comp: usize,
    limit_type: LimitType,
    scale: bool,
}

impl Default for SimcaParameters {
    fn default() -> Self {
        Self::new(0.05, 0.01, 3, LimitType::DdMoments, false)
    }
}

impl SimcaParameters {
    /// * `alpha` - significance level for extremes.
    /// * `gamma` - significance level for outliers.
    /// * `n_comp` - number of principal components.
    /// * `limit_type` - estimation scheme of the distance limits.
    /// * `scale` - standardize the features before the PCA (decompose the correlation
    ///   instead of the covariance matrix). Fixed for the lifetime of a model.
    pub fn new(alpha: f64, gamma: f64, n_comp: usize, limit_type: LimitType, scale: bool) -> Self {
        Self {
            alpha: unit_interval(alpha),
            gamma: unit_interval(gamma),
            n_comp,
            limit_type,
            scale,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn scale(&self) -> bool {
        self.scale
    }

    pub fn with_alpha(self, alpha: f64) -> Self {
        Self { alpha: unit_interval(alpha), ..self }
    }

    pub fn with_gamma(self, gamma: f64) -> Self {
        Self { gamma: unit_interval(gamma), ..self }
    }

    pub fn with_n_comp(self, n_comp: usize) -> Self {
        Self { n_comp, ..self }
    }

    pub fn with_limit_type(self, limit_type: LimitType) -> Self {
        Self { limit_type, ..self }
    }

    /// Caps the component count at `min(n_samples, n_features)`.
    pub fn clamped_to(self, n_samples: usize, n_features: usize) -> Self {
        Self { n_comp: self.n_comp.min(n_samples).min(n_features), ..self }
    }
}

fn unit_interval(value: f64) -> f64 {
    if value >= 0.0 {
        value.min(1.0)
    } else {
        0.0
    }
}

/// A fitted SIMCA class model.
///
/// The model owns its PCA basis and everything derived from it. Parameters, calibration
/// projection and limits only ever change together, through [`Simca::recalibrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Simca {
    data: Array2<f64>,
    preprocessing_mean: Array1<f64>,
    preprocessing_std: Option<Array1<f64>>,
    pca: PcaBasis,
    calibration_result: Projection,
    test_result: Option<Projection>,
    limits: DistanceLimits,
    parameters: SimcaParameters,
}

impl Simca {
    /// Builds a class model from calibration data believed to belong to a single class.
    ///
    /// The data is centered (and scaled, if `parameters.scale()`), a PCA basis is fitted,
    /// and the model is calibrated with `parameters`. If `test_matrix` is given it is
    /// preprocessed and projected through the fitted basis as well.
    ///
    /// # Errors
    /// Fails if the data is empty, if the cleaned component count is zero, if the test
    /// matrix has the wrong number of columns, or if a numeric step fails.
    pub fn generate<S, A>(
        one_class_data: &ArrayBase<S, Ix2>,
        parameters: SimcaParameters,
        test_matrix: Option<ArrayView2<f64>>,
    ) -> Result<Self, SimcaError>
    where
        S: Data<Elem = A>,
        A: Copy + Into<f64>,
    {
        let data: Array2<f64> = one_class_data.mapv(Into::into);
        let (n_samples, n_features) = data.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(SimcaError::EmptyMatrix { rows: n_samples, cols: n_features });
        }

        if let Some(matrix) = test_matrix {
            if matrix.ncols() != n_features {
                return Err(SimcaError::DimensionMismatch { expected: n_features, found: matrix.ncols() });
            }
        }

        let preprocessing_mean = column_mean(data.view());
        let preprocessing_std = parameters.scale().then(|| column_std(data.view(), 1));
        let parameters = parameters.clamped_to(n_samples, n_features);
        info!(
            "Generating SIMCA model: {} samples, {} features, {} components, {} limits, scale={}.",
            n_samples,
            n_features,
            parameters.n_comp(),
            parameters.limit_type(),
            parameters.scale()
        );

        let preprocessed = preprocess(data.view(), &preprocessing_mean, preprocessing_std.as_ref());
        let pca = PcaBasis::fit(preprocessed, false)?;
        let (calibration_result, limits) = calibrate(&pca, parameters)?;

        let test_result = match test_matrix {
            Some(matrix) => {
                let preprocessed = preprocess(matrix, &preprocessing_mean, preprocessing_std.as_ref());
                Some(pca.project(preprocessed.view(), parameters.n_comp())?)
            }
            None => None,
        };

        Ok(Self {
            data,
            preprocessing_mean,
            preprocessing_std,
            pca,
            calibration_result,
            test_result,
            limits,
            parameters,
        })
    }

    /// Reassembles a model from stored parts. Used by the deserializer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        data: Array2<f64>,
        preprocessing_mean: Array1<f64>,
        preprocessing_std: Option<Array1<f64>>,
        pca: PcaBasis,
        calibration_result: Projection,
        test_result: Option<Projection>,
        limits: DistanceLimits,
        parameters: SimcaParameters,
    ) -> Self {
        Self {
            data,
            preprocessing_mean,
            preprocessing_std,
            pca,
            calibration_result,
            test_result,
            limits,
            parameters,
        }
    }

    /// Re-derives the calibration projection and limits for new parameters.
    ///
    /// The PCA basis and the preprocessing statistics are kept; the matrix stored in the
    /// basis is re-projected. Nothing is changed unless every step succeeds.
    ///
    /// # Errors
    /// Fails with [`SimcaError::ScaleChangeRejected`] if `new_parameters.scale()` differs
    /// from the model's, or if the cleaned component count is zero.
    pub fn recalibrate(&mut self, new_parameters: SimcaParameters) -> Result<(), SimcaError> {
        if new_parameters.scale() != self.parameters.scale() {
            warn!("Rejected recalibration: the scale flag of a fitted model can not change.");
            return Err(SimcaError::ScaleChangeRejected);
        }
        let (n_samples, n_features) = self.data.dim();
        let new_parameters = new_parameters.clamped_to(n_samples, n_features);
        debug!(
            "Recalibrating SIMCA model: {} -> {} components, {} -> {} limits.",
            self.parameters.n_comp(),
            new_parameters.n_comp(),
            self.parameters.limit_type(),
            new_parameters.limit_type()
        );

        let (calibration_result, limits) = calibrate(&self.pca, new_parameters)?;
        self.parameters = new_parameters;
        self.calibration_result = calibration_result;
        self.limits = limits;
        Ok(())
    }

    /// Probabilities for the rows of `matrix` to belong to the calibration class, for
    /// every component count. Shape: (n_rows, parameters.n_comp()).
    pub fn predict_all_components(&self, matrix: ArrayView2<f64>) -> Result<Array2<f64>, SimcaError> {
        if matrix.ncols() != self.n_features() {
            return Err(SimcaError::DimensionMismatch { expected: self.n_features(), found: matrix.ncols() });
        }
        let preprocessed = self.preprocess(matrix);
        let projection = self.pca.project(preprocessed.view(), self.parameters.n_comp())?;
        self.limits.probabilities(&projection)
    }

    /// Probabilities for the rows of `matrix` to belong to the calibration class.
    ///
    /// `comp_count` selects the number of principal components; `0` means the model's
    /// maximum, `parameters().n_comp()`.
    ///
    /// # Errors
    /// Fails if `comp_count` exceeds the model's component count.
    pub fn predict(&self, matrix: ArrayView2<f64>, comp_count: usize) -> Result<Array1<f64>, SimcaError> {
        let n_comp = self.parameters.n_comp();
        if comp_count > n_comp {
            return Err(SimcaError::ComponentCountOutOfRange { requested: comp_count, maximum: n_comp });
        }
        let column = if comp_count == 0 { n_comp } else { comp_count } - 1;
        let probabilities = self.predict_all_components(matrix)?;
        Ok(probabilities.column(column).to_owned())
    }

    /// `1 - mean(|target - prediction|)`.
    ///
    /// `components` defaults to the model's component count.
    pub fn score(
        &self,
        matrix: ArrayView2<f64>,
        target_values: ArrayView1<f64>,
        components: Option<usize>,
    ) -> Result<f64, SimcaError> {
        let components = components.unwrap_or(self.parameters.n_comp());
        if target_values.len() != matrix.nrows() {
            return Err(SimcaError::TargetLengthMismatch { expected: matrix.nrows(), found: target_values.len() });
        }
        let predictions = self.predict(matrix, components)?;
        let mean_abs_error = (&target_values - &predictions).mapv(f64::abs).sum() / predictions.len() as f64;
        Ok(1.0 - mean_abs_error)
    }

    /// Centers by the stored mean and, for scaled models, divides by the stored std.
    fn preprocess(&self, matrix: ArrayView2<f64>) -> Array2<f64> {
        preprocess(matrix, &self.preprocessing_mean, self.preprocessing_std.as_ref())
    }

    /// The calibration data as given (converted to floating point).
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    pub fn preprocessing_mean(&self) -> &Array1<f64> {
        &self.preprocessing_mean
    }

    /// `None` unless the model scales its input.
    pub fn preprocessing_std(&self) -> Option<&Array1<f64>> {
        self.preprocessing_std.as_ref()
    }

    pub fn pca(&self) -> &PcaBasis {
        &self.pca
    }

    pub fn calibration_result(&self) -> &Projection {
        &self.calibration_result
    }

    pub fn test_result(&self) -> Option<&Projection> {
        self.test_result.as_ref()
    }

    pub fn limits(&self) -> &DistanceLimits {
        &self.limits
    }

    pub fn parameters(&self) -> &SimcaParameters {
        &self.parameters
    }

    /// Writes the model as JSON text (see [`crate::serializer`]) to `path`.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), SimcaError> {
        let text = crate::serializer::to_text(self)?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a model previously written by [`Simca::save_model`].
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, SimcaError> {
        let mut text = String::new();
        BufReader::new(File::open(path.as_ref())?).read_to_string(&mut text)?;
        crate::serializer::from_text(&text)
    }
}

/// Projects the basis's own matrix and derives limits from it.
fn calibrate(pca: &PcaBasis, parameters: SimcaParameters) -> Result<(Projection, DistanceLimits), SimcaError> {
    let calibration_result = pca.project(pca.matrix().view(), parameters.n_comp())?;
    let limits = DistanceLimits::generate(&calibration_result, parameters)?;
    Ok((calibration_result, limits))
}

fn preprocess(matrix: ArrayView2<f64>, mean: &Array1<f64>, std: Option<&Array1<f64>>) -> Array2<f64> {
    let mut preprocessed = &matrix - mean;
    if let Some(std) = std {
        preprocessed /= std;
    }
    preprocessed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn parameters_are_cleaned_on_construction() {
        let p = SimcaParameters::new(1.7, -0.3, 4, LimitType::DdRobust, true);
        assert_eq!(p.alpha(), 1.0);
        assert_eq!(p.gamma(), 0.0);
        assert_eq!(SimcaParameters::default().with_alpha(f64::NAN).alpha(), 0.0);
        assert_eq!(p.clamped_to(10, 2).n_comp(), 2);
        assert_eq!(p.clamped_to(3, 20).n_comp(), 3);
        assert!(p.scale());
    }

    #[test]
    fn generate_converts_integer_input() {
        let data = array![[1i32, 2], [3, 5], [4, 4], [0, 1]];
        let model = Simca::generate(&data, SimcaParameters::default(), None).unwrap();
        assert_eq!(model.data()[[1, 1]], 5.0);
        assert_eq!(model.parameters().n_comp(), 2);
        assert!(model.preprocessing_std().is_none());
        assert!(model.test_result().is_none());
    }

    #[test]
    fn generate_rejects_zero_components() {
        let data = array![[1.0, 2.0], [3.0, 5.0]];
        let params = SimcaParameters::default().with_n_comp(0);
        assert!(matches!(
            Simca::generate(&data, params, None),
            Err(SimcaError::InvalidComponentCount)
        ));
    }

    #[test]
    fn failed_recalibration_leaves_model_untouched() {
        let data = array![[1.0, 2.0, 0.5], [3.0, 5.0, 1.0], [4.0, 4.0, 2.5], [0.0, 1.0, 0.0]];
        let mut model = Simca::generate(&data, SimcaParameters::default(), None).unwrap();
        let before = model.clone();
        assert!(model.recalibrate(SimcaParameters::default().with_n_comp(0)).is_err());
        assert_eq!(model, before);
    }
}

// src/model_type.rs

//! Adapter exposing SIMCA through the generic prediction-model contract of a hosting
//! application: models are stored as text, measurements provide an input matrix and
//! optionally a target vector.

use log::info;
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::SimcaError;
use crate::limits::LimitType;
use crate::serializer::{from_text, to_text};
use crate::simca::{Simca, SimcaParameters};

/// Format used to store model data.
pub type ModelStorage = String;

/// A stored model as seen by a model type.
pub trait StoredModel {
    /// Identifier of the model type that produced `data`.
    fn type_id(&self) -> &str;
    fn data(&self) -> &str;
}

/// A measurement as seen by a model type.
pub trait Measurement {
    /// Rows = samples, columns = features.
    fn model_input(&self) -> ArrayView2<'_, f64>;
    /// One label per row; `None` for unlabelled measurements.
    fn model_target(&self) -> Option<ArrayView1<'_, f64>>;
}

/// Plain owned [`StoredModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub type_id: String,
    pub data: ModelStorage,
}

impl StoredModel for ModelRecord {
    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn data(&self) -> &str {
        &self.data
    }
}

/// Plain owned [`Measurement`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementData {
    pub input: Array2<f64>,
    pub target: Option<Array1<f64>>,
}

impl MeasurementData {
    pub fn labelled(input: Array2<f64>, target: Array1<f64>) -> Self {
        Self { input, target: Some(target) }
    }

    pub fn unlabelled(input: Array2<f64>) -> Self {
        Self { input, target: None }
    }
}

impl Measurement for MeasurementData {
    fn model_input(&self) -> ArrayView2<'_, f64> {
        self.input.view()
    }

    fn model_target(&self) -> Option<ArrayView1<'_, f64>> {
        self.target.as_ref().map(Array1::view)
    }
}

/// Type of a prediction model.
pub trait ModelType {
    /// Identifier used in internal dictionaries, at most 10 characters.
    fn id(&self) -> &'static str;
    /// Short, concise name.
    fn name(&self) -> &'static str;
    /// The type, its uses, and references to external docs.
    fn description(&self) -> &'static str;
    /// Score of a model evaluated against a labelled measurement.
    fn score(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<f64, SimcaError>;
    fn predict(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<Array1<f64>, SimcaError>;
    /// Formatted description of the concrete data and parameters of `model`.
    fn details_text(&self, model: &dyn StoredModel) -> Result<String, SimcaError>;
    /// `true` iff `measurement` is a valid prediction input for `model`.
    fn compatible(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<bool, SimcaError>;
    /// Trains a new model from `measurements`, returning its data and score.
    fn train(
        &self,
        model: &dyn StoredModel,
        measurements: &[&dyn Measurement],
        max_iterations: usize,
        max_seconds: u64,
    ) -> Result<(ModelStorage, f64), SimcaError>;
}

/// SIMCA as a [`ModelType`]: Soft Independent Modelling of Class Analogy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimcaModelType;

const DESCRIPTION: &str = "Soft Independent Modelling of Class Analogy (SIMCA): a one-class classifier \
built on a PCA model of the calibration class. Predictions are probabilities that a sample belongs \
to that class.\n\nFurther info:\n    - https://mdatools.com/docs/simca.html\n    - https://doi.org/10.1002/cem.2506";

impl SimcaModelType {
    /// `(value, name)` pairs of the supported limit types, for form choices.
    pub fn limit_type_choices() -> Vec<(u8, &'static str)> {
        LimitType::ALL.iter().map(|t| (t.value(), t.name())).collect()
    }

    /// Data of a trivial model: generated from an all-zero `n_comp x n_features` matrix.
    pub fn default_data(&self, n_features: usize, parameters: SimcaParameters) -> Result<ModelStorage, SimcaError> {
        let trivial = Array2::<f64>::zeros((parameters.n_comp(), n_features));
        to_text(&Simca::generate(&trivial, parameters, None)?)
    }

    fn load(model: &dyn StoredModel) -> Result<Simca, SimcaError> {
        from_text(model.data())
    }
}

impl ModelType for SimcaModelType {
    fn id(&self) -> &'static str {
        "Simca"
    }

    fn name(&self) -> &'static str {
        "SimcaModel"
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn score(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<f64, SimcaError> {
        let target = measurement.model_target().ok_or(SimcaError::MissingTarget)?;
        Self::load(model)?.score(measurement.model_input(), target, None)
    }

    fn predict(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<Array1<f64>, SimcaError> {
        Self::load(model)?.predict(measurement.model_input(), 0)
    }

    fn details_text(&self, model: &dyn StoredModel) -> Result<String, SimcaError> {
        let simca = Self::load(model)?;
        let p = simca.parameters();
        Ok(format!(
            "Simca model for numerical data with {} features\n\
             Model parameters:\n\
             - alpha: {}\n\
             - gamma: {}\n\
             - limit type: {}\n\
             - components: {}\n\
             - scale: {}",
            simca.n_features(),
            p.alpha(),
            p.gamma(),
            p.limit_type(),
            p.n_comp(),
            p.scale()
        ))
    }

    fn compatible(&self, model: &dyn StoredModel, measurement: &dyn Measurement) -> Result<bool, SimcaError> {
        Ok(measurement.model_input().ncols() == Self::load(model)?.n_features())
    }

    /// Regenerates the model with its current parameters from the rows labelled exactly
    /// `1.0`. The score is the mean of the per-measurement scores. SIMCA training is not
    /// iterative, so `max_iterations` and `max_seconds` are not used.
    fn train(
        &self,
        model: &dyn StoredModel,
        measurements: &[&dyn Measurement],
        _max_iterations: usize,
        _max_seconds: u64,
    ) -> Result<(ModelStorage, f64), SimcaError> {
        if measurements.is_empty() {
            return Err(SimcaError::EmptyMatrix { rows: 0, cols: 0 });
        }
        let inputs: Vec<ArrayView2<f64>> = measurements.iter().map(|m| m.model_input()).collect();
        let targets = measurements
            .iter()
            .map(|m| m.model_target().ok_or(SimcaError::MissingTarget))
            .collect::<Result<Vec<_>, _>>()?;
        for (input, target) in inputs.iter().zip(&targets) {
            if input.nrows() != target.len() {
                return Err(SimcaError::TargetLengthMismatch { expected: input.nrows(), found: target.len() });
            }
        }

        let current = Self::load(model)?;
        let n_features = current.n_features();
        if let Some(input) = inputs.iter().find(|input| input.ncols() != n_features) {
            return Err(SimcaError::DimensionMismatch { expected: n_features, found: input.ncols() });
        }
        let x = concatenate(Axis(0), &inputs)?;
        let y = concatenate(Axis(0), &targets)?;

        let one_class: Vec<usize> = y.iter().enumerate().filter(|(_, t)| **t == 1.0).map(|(i, _)| i).collect();
        info!(
            "Training SIMCA model on {} of {} labelled rows from {} measurements.",
            one_class.len(),
            y.len(),
            measurements.len()
        );
        let x_one_class = x.select(Axis(0), &one_class);
        let trained = Simca::generate(&x_one_class, *current.parameters(), None)?;

        let mut total = 0.0;
        for (input, target) in inputs.iter().zip(&targets) {
            total += trained.score(input.view(), target.view(), None)?;
        }
        let score = total / measurements.len() as f64;
        info!("Trained SIMCA model scores {:.4}.", score);
        Ok((to_text(&trained)?, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stored(data: ModelStorage) -> ModelRecord {
        ModelRecord { type_id: SimcaModelType.id().to_string(), data }
    }

    #[test]
    fn identity_of_the_model_type() {
        let t = SimcaModelType;
        assert_eq!(t.id(), "Simca");
        assert!(t.id().len() <= 10);
        assert_eq!(t.name(), "SimcaModel");
        assert!(t.description().contains("mdatools"));
        assert_eq!(SimcaModelType::limit_type_choices(), vec![(1, "DDROBUST"), (2, "DDMOMENTS")]);
    }

    #[test]
    fn default_data_is_a_usable_model() {
        let t = SimcaModelType;
        let model = stored(t.default_data(2, SimcaParameters::default()).unwrap());
        let details = t.details_text(&model).unwrap();
        assert!(details.starts_with("Simca model for numerical data with 2 features"));
        assert!(details.contains("- limit type: DDMOMENTS"));
        assert!(details.contains("- components: 2"));

        let measurement = MeasurementData::unlabelled(array![[0.0, 0.0], [3.0, -1.0]]);
        assert!(t.compatible(&model, &measurement).unwrap());
        assert!(!t.compatible(&model, &MeasurementData::unlabelled(array![[1.0, 2.0, 3.0]])).unwrap());
        let prediction = t.predict(&model, &measurement).unwrap();
        assert_eq!(prediction.len(), 2);
        assert!(prediction.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn score_requires_labels() {
        let t = SimcaModelType;
        let model = stored(t.default_data(2, SimcaParameters::default()).unwrap());
        let unlabelled = MeasurementData::unlabelled(array![[0.0, 0.0]]);
        assert!(matches!(t.score(&model, &unlabelled), Err(SimcaError::MissingTarget)));
    }

    #[test]
    fn train_without_positive_rows_fails() {
        let t = SimcaModelType;
        let model = stored(t.default_data(2, SimcaParameters::default()).unwrap());
        let negatives = MeasurementData::labelled(array![[1.0, 2.0], [2.0, 1.0]], array![0.0, 0.0]);
        let result = t.train(&model, &[&negatives], 10, 10);
        assert!(matches!(result, Err(SimcaError::EmptyMatrix { rows: 0, cols: 2 })));
    }
}

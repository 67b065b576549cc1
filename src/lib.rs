// SIMCA one-class classification on top of a principal component analysis (PCA)

#![doc = include_str!("../README.md")]

pub mod error;
pub mod helpers;
pub mod limits;
pub mod linalg_backends;
pub mod model_type;
pub mod pca;
pub mod serializer;
pub mod simca;

pub use error::{FormatError, SimcaError};
pub use limits::{DistanceLimits, LimitParameters, LimitType, Limits};
pub use model_type::{Measurement, MeasurementData, ModelRecord, ModelStorage, ModelType, SimcaModelType, StoredModel};
pub use pca::{Distances, PcaBasis, Projection};
pub use simca::{Simca, SimcaParameters};

#[cfg(test)]
mod pca_tests;

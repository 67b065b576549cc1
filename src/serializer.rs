// src/serializer.rs

//! (De)serialization of SIMCA models from/to JSON-compatible tagged dictionaries.
//!
//! Every stored object is a JSON object carrying its type under [`TYPE_KEY`]; absent values
//! are written as `{"object_type": "None"}`. Projections and limits do not store the PCA
//! basis or the parameters they belong to: the model stores those once, and passes them down
//! while reading.

use log::debug;
use ndarray::{Array1, Array2};
use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::error::{FormatError, SimcaError};
use crate::limits::{DistanceLimits, LimitParameters, LimitType, Limits};
use crate::pca::{Distances, PcaBasis, Projection};
use crate::simca::{Simca, SimcaParameters};

/// Key of the type discriminator in every stored dictionary.
pub const TYPE_KEY: &str = "object_type";
/// Placeholder for back references that are restored from the enclosing object.
pub const NOT_SERIALIZED: &str = "NOT SERIALIZED";
const NONE_TAG: &str = "None";

/// The dictionary standing in for an absent value.
pub fn none_dict() -> Value {
    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), Value::String(NONE_TAG.to_string()));
    Value::Object(map)
}

fn is_none_dict(value: &Value) -> bool {
    matches!(value, Value::Object(map)
        if map.len() == 1 && map.get(TYPE_KEY).and_then(Value::as_str) == Some(NONE_TAG))
}

/// Tag handling shared by all serializers.
pub trait TaggedSerializer {
    /// Value stored under [`TYPE_KEY`].
    const TYPE_STRING: &'static str;

    /// A dictionary with only the type tag set.
    fn init_dict() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(Self::TYPE_STRING.to_string()));
        map
    }

    /// Checks that `value` is a dictionary tagged with [`Self::TYPE_STRING`].
    fn validate_dict(value: &Value) -> Result<&Map<String, Value>, FormatError> {
        let map = value.as_object().ok_or(FormatError::NotADictionary(Self::TYPE_STRING))?;
        let tag = map.get(TYPE_KEY).ok_or(FormatError::MissingTypeTag)?;
        match tag.as_str() {
            Some(found) if found == Self::TYPE_STRING => Ok(map),
            _ => Err(FormatError::WrongTypeTag {
                expected: Self::TYPE_STRING,
                found: tag.as_str().map_or_else(|| tag.to_string(), str::to_string),
            }),
        }
    }
}

fn field<'a>(map: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, FormatError> {
    map.get(name).ok_or(FormatError::MissingField(name))
}

fn bool_field(map: &Map<String, Value>, name: &'static str) -> Result<bool, FormatError> {
    field(map, name)?
        .as_bool()
        .ok_or_else(|| FormatError::InvalidField { field: name, reason: "expected a boolean".to_string() })
}

fn count_field(map: &Map<String, Value>, name: &'static str) -> Result<usize, FormatError> {
    let value = field(map, name)?;
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| FormatError::InvalidField { field: name, reason: format!("expected a count, got {}", value) })
}

fn inconsistent(e: SimcaError) -> FormatError {
    FormatError::Inconsistent(e.to_string())
}

/// Arrays as `{"object_type": "numpy.ndarray", "values": [...]}`.
///
/// Non-finite elements are written as `"NaN"`, `"Infinity"` and `"-Infinity"`; `null` reads
/// as NaN.
pub struct ArraySerializer;

impl TaggedSerializer for ArraySerializer {
    const TYPE_STRING: &'static str = "numpy.ndarray";
}

impl ArraySerializer {
    pub fn vector_to_dict(array: &Array1<f64>) -> Value {
        let mut map = Self::init_dict();
        map.insert("values".to_string(), Value::Array(array.iter().map(|&v| float_to_value(v)).collect()));
        Value::Object(map)
    }

    pub fn matrix_to_dict(array: &Array2<f64>) -> Value {
        let rows = array
            .rows()
            .into_iter()
            .map(|row| Value::Array(row.iter().map(|&v| float_to_value(v)).collect()))
            .collect();
        let mut map = Self::init_dict();
        map.insert("values".to_string(), Value::Array(rows));
        Value::Object(map)
    }

    pub fn optional_vector_to_dict(array: Option<&Array1<f64>>) -> Value {
        array.map_or_else(none_dict, Self::vector_to_dict)
    }

    /// Reads a vector. A nested array with a single row is accepted as well.
    pub fn vector_from_dict(value: &Value) -> Result<Array1<f64>, FormatError> {
        let values = Self::values(value)?;
        let flat = match values {
            [Value::Array(row)] => row.as_slice(),
            _ => values,
        };
        let data = flat.iter().map(value_to_float).collect::<Result<Vec<f64>, _>>()?;
        Ok(Array1::from(data))
    }

    pub fn optional_vector_from_dict(value: &Value) -> Result<Option<Array1<f64>>, FormatError> {
        if is_none_dict(value) {
            return Ok(None);
        }
        Self::vector_from_dict(value).map(Some)
    }

    /// Reads a matrix stored as a list of rows. `[]` is a 0x0 matrix.
    pub fn matrix_from_dict(value: &Value) -> Result<Array2<f64>, FormatError> {
        let rows = Self::values(value)?;
        let n_cols = match rows.first() {
            None => return Ok(Array2::zeros((0, 0))),
            Some(Value::Array(first)) => first.len(),
            Some(other) => return Err(FormatError::MalformedArray(format!("expected a list of rows, found {}", other))),
        };
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row
                .as_array()
                .ok_or_else(|| FormatError::MalformedArray(format!("row {} is not a list", i)))?;
            if row.len() != n_cols {
                return Err(FormatError::MalformedArray(format!(
                    "row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    n_cols
                )));
            }
            for v in row {
                data.push(value_to_float(v)?);
            }
        }
        Array2::from_shape_vec((rows.len(), n_cols), data).map_err(|e| FormatError::MalformedArray(e.to_string()))
    }

    fn values(value: &Value) -> Result<&[Value], FormatError> {
        let map = Self::validate_dict(value)?;
        field(map, "values")?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| FormatError::MalformedArray("'values' is not a list".to_string()))
    }
}

fn float_to_value(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".to_string()),
        None if v > 0.0 => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}

fn value_to_float(value: &Value) -> Result<f64, FormatError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FormatError::MalformedArray(format!("number {} is not representable", n))),
        Value::Null => Ok(f64::NAN),
        Value::String(s) => match s.as_str() {
            "NaN" | "nan" => Ok(f64::NAN),
            "Infinity" | "inf" => Ok(f64::INFINITY),
            "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
            _ => Err(FormatError::MalformedArray(format!("'{}' is not a number", s))),
        },
        other => Err(FormatError::MalformedArray(format!("{} is not a number", other))),
    }
}

#[derive(Deserialize)]
struct ParametersRecord {
    alpha: f64,
    gamma: f64,
    n_comp: usize,
    limit_type: LimitType,
    scale: bool,
}

pub struct SimcaParametersSerializer;

impl TaggedSerializer for SimcaParametersSerializer {
    const TYPE_STRING: &'static str = "simca_parameters";
}

impl SimcaParametersSerializer {
    pub fn to_dict(parameters: &SimcaParameters) -> Value {
        let mut map = Self::init_dict();
        map.insert("alpha".to_string(), float_to_value(parameters.alpha()));
        map.insert("gamma".to_string(), float_to_value(parameters.gamma()));
        map.insert("n_comp".to_string(), Value::from(parameters.n_comp()));
        map.insert("limit_type".to_string(), Value::String(parameters.limit_type().name().to_string()));
        map.insert("scale".to_string(), Value::Bool(parameters.scale()));
        Value::Object(map)
    }

    pub fn from_dict(value: &Value) -> Result<SimcaParameters, FormatError> {
        let map = Self::validate_dict(value)?;
        if let Some(name) = map.get("limit_type").and_then(Value::as_str) {
            name.parse::<LimitType>()?;
        }
        let record: ParametersRecord = serde_json::from_value(Value::Object(map.clone()))?;
        Ok(SimcaParameters::new(record.alpha, record.gamma, record.n_comp, record.limit_type, record.scale))
    }
}

pub struct PcaSerializer;

impl TaggedSerializer for PcaSerializer {
    const TYPE_STRING: &'static str = "PCA";
}

impl PcaSerializer {
    pub fn to_dict(pca: &PcaBasis) -> Value {
        let mut map = Self::init_dict();
        map.insert("covariance".to_string(), ArraySerializer::matrix_to_dict(pca.covariance()));
        map.insert("eigenvalues".to_string(), ArraySerializer::vector_to_dict(pca.eigenvalues()));
        map.insert("eigenvectors".to_string(), ArraySerializer::matrix_to_dict(pca.eigenvectors()));
        map.insert("matrix".to_string(), ArraySerializer::matrix_to_dict(pca.matrix()));
        map.insert("bias".to_string(), Value::Bool(pca.bias()));
        Value::Object(map)
    }

    pub fn from_dict(value: &Value) -> Result<PcaBasis, FormatError> {
        let map = Self::validate_dict(value)?;
        PcaBasis::from_parts(
            ArraySerializer::matrix_from_dict(field(map, "matrix")?)?,
            ArraySerializer::matrix_from_dict(field(map, "covariance")?)?,
            ArraySerializer::vector_from_dict(field(map, "eigenvalues")?)?,
            ArraySerializer::matrix_from_dict(field(map, "eigenvectors")?)?,
            bool_field(map, "bias")?,
        )
        .map_err(inconsistent)
    }
}

pub struct ProjectionSerializer;

impl TaggedSerializer for ProjectionSerializer {
    const TYPE_STRING: &'static str = "PCA_projection";
}

impl ProjectionSerializer {
    pub fn to_dict(projection: &Projection) -> Value {
        let distances = projection.distances();
        let mut distance_map = Map::new();
        distance_map.insert("Q".to_string(), ArraySerializer::matrix_to_dict(&distances.q));
        distance_map.insert("T2".to_string(), ArraySerializer::matrix_to_dict(&distances.t2));

        let mut map = Self::init_dict();
        map.insert("pca".to_string(), Value::String(NOT_SERIALIZED.to_string()));
        map.insert("distances".to_string(), Value::Object(distance_map));
        map.insert("scores".to_string(), ArraySerializer::matrix_to_dict(projection.scores()));
        map.insert("residuals".to_string(), ArraySerializer::matrix_to_dict(projection.residuals()));
        Value::Object(map)
    }

    pub fn optional_to_dict(projection: Option<&Projection>) -> Value {
        projection.map_or_else(none_dict, Self::to_dict)
    }

    /// `basis` is the PCA of the enclosing model.
    pub fn from_dict(value: &Value, basis: &PcaBasis) -> Result<Projection, FormatError> {
        let map = Self::validate_dict(value)?;
        let distances = field(map, "distances")?
            .as_object()
            .ok_or(FormatError::NotADictionary("distances"))?;
        let distances = Distances {
            q: ArraySerializer::matrix_from_dict(field(distances, "Q")?)?,
            t2: ArraySerializer::matrix_from_dict(field(distances, "T2")?)?,
        };
        Projection::from_parts(
            ArraySerializer::matrix_from_dict(field(map, "scores")?)?,
            ArraySerializer::matrix_from_dict(field(map, "residuals")?)?,
            distances,
            basis,
        )
        .map_err(inconsistent)
    }

    pub fn optional_from_dict(value: &Value, basis: &PcaBasis) -> Result<Option<Projection>, FormatError> {
        if is_none_dict(value) {
            return Ok(None);
        }
        Self::from_dict(value, basis).map(Some)
    }
}

pub struct LimitsSerializer;

impl TaggedSerializer for LimitsSerializer {
    const TYPE_STRING: &'static str = "limits";
}

impl LimitsSerializer {
    pub fn to_dict(limits: &Limits) -> Value {
        let mut map = Self::init_dict();
        map.insert("dof".to_string(), ArraySerializer::vector_to_dict(&limits.dof));
        map.insert("mean".to_string(), ArraySerializer::vector_to_dict(&limits.mean));
        map.insert("outliers".to_string(), ArraySerializer::vector_to_dict(&limits.outliers));
        map.insert("extremes".to_string(), ArraySerializer::vector_to_dict(&limits.extremes));
        Value::Object(map)
    }

    pub fn from_dict(value: &Value) -> Result<Limits, FormatError> {
        let map = Self::validate_dict(value)?;
        let limits = Limits {
            extremes: ArraySerializer::vector_from_dict(field(map, "extremes")?)?,
            outliers: ArraySerializer::vector_from_dict(field(map, "outliers")?)?,
            mean: ArraySerializer::vector_from_dict(field(map, "mean")?)?,
            dof: ArraySerializer::vector_from_dict(field(map, "dof")?)?,
        };
        let n = limits.mean.len();
        if limits.extremes.len() != n || limits.outliers.len() != n || limits.dof.len() != n {
            return Err(FormatError::Inconsistent("limit vectors differ in length".to_string()));
        }
        Ok(limits)
    }
}

pub struct DistanceLimitsSerializer;

impl TaggedSerializer for DistanceLimitsSerializer {
    const TYPE_STRING: &'static str = "distance_limits";
}

impl DistanceLimitsSerializer {
    pub fn to_dict(limits: &DistanceLimits) -> Value {
        let mut map = Self::init_dict();
        map.insert("Q".to_string(), LimitsSerializer::to_dict(limits.q()));
        map.insert("T2".to_string(), LimitsSerializer::to_dict(limits.t2()));
        map.insert("parameters".to_string(), Value::String(NOT_SERIALIZED.to_string()));
        map.insert("Q_params".to_string(), limit_parameters_to_dict(limits.q_params()));
        map.insert("T2_params".to_string(), limit_parameters_to_dict(limits.t2_params()));
        Value::Object(map)
    }

    /// `parameters` are the parameters of the enclosing model.
    pub fn from_dict(value: &Value, parameters: SimcaParameters) -> Result<DistanceLimits, FormatError> {
        let map = Self::validate_dict(value)?;
        let q = LimitsSerializer::from_dict(field(map, "Q")?)?;
        let t2 = LimitsSerializer::from_dict(field(map, "T2")?)?;
        let q_params = limit_parameters_from_dict(field(map, "Q_params")?, "Q_params")?;
        let t2_params = limit_parameters_from_dict(field(map, "T2_params")?, "T2_params")?;

        let n = q.mean.len();
        let lengths = [t2.mean.len(), q_params.u0.len(), q_params.nu.len(), t2_params.u0.len(), t2_params.nu.len()];
        if lengths.iter().any(|&len| len != n) {
            return Err(FormatError::Inconsistent(format!(
                "distance limits cover {} components, but their parameters do not",
                n
            )));
        }
        Ok(DistanceLimits::from_parts(parameters, q, t2, q_params, t2_params))
    }
}

fn limit_parameters_to_dict(params: &LimitParameters) -> Value {
    let mut map = Map::new();
    map.insert("u0".to_string(), ArraySerializer::vector_to_dict(&params.u0));
    map.insert("Nu".to_string(), ArraySerializer::vector_to_dict(&params.nu));
    map.insert("nobj".to_string(), Value::from(params.nobj));
    Value::Object(map)
}

fn limit_parameters_from_dict(value: &Value, name: &'static str) -> Result<LimitParameters, FormatError> {
    let map = value.as_object().ok_or(FormatError::NotADictionary(name))?;
    Ok(LimitParameters {
        u0: ArraySerializer::vector_from_dict(field(map, "u0")?)?,
        nu: ArraySerializer::vector_from_dict(field(map, "Nu")?)?,
        nobj: count_field(map, "nobj")?,
    })
}

pub struct SimcaSerializer;

impl TaggedSerializer for SimcaSerializer {
    const TYPE_STRING: &'static str = "Simca";
}

impl SimcaSerializer {
    pub fn to_dict(model: &Simca) -> Value {
        let mut map = Self::init_dict();
        map.insert("pca".to_string(), PcaSerializer::to_dict(model.pca()));
        map.insert("parameters".to_string(), SimcaParametersSerializer::to_dict(model.parameters()));
        map.insert("preprocessing_mean".to_string(), ArraySerializer::vector_to_dict(model.preprocessing_mean()));
        map.insert(
            "preprocessing_std".to_string(),
            ArraySerializer::optional_vector_to_dict(model.preprocessing_std()),
        );
        map.insert("data".to_string(), ArraySerializer::matrix_to_dict(model.data()));
        map.insert("calibration_result".to_string(), ProjectionSerializer::to_dict(model.calibration_result()));
        map.insert("test_result".to_string(), ProjectionSerializer::optional_to_dict(model.test_result()));
        map.insert("limit".to_string(), DistanceLimitsSerializer::to_dict(model.limits()));
        Value::Object(map)
    }

    pub fn from_dict(value: &Value) -> Result<Simca, FormatError> {
        let map = Self::validate_dict(value)?;
        let pca = PcaSerializer::from_dict(field(map, "pca")?)?;
        let parameters = SimcaParametersSerializer::from_dict(field(map, "parameters")?)?;
        let data = ArraySerializer::matrix_from_dict(field(map, "data")?)?;
        let preprocessing_mean = ArraySerializer::vector_from_dict(field(map, "preprocessing_mean")?)?;
        let preprocessing_std = ArraySerializer::optional_vector_from_dict(field(map, "preprocessing_std")?)?;
        let calibration_result = ProjectionSerializer::from_dict(field(map, "calibration_result")?, &pca)?;
        let test_result = ProjectionSerializer::optional_from_dict(field(map, "test_result")?, &pca)?;
        let limits = DistanceLimitsSerializer::from_dict(field(map, "limit")?, parameters)?;

        check_consistency(
            &pca,
            &parameters,
            &data,
            &preprocessing_mean,
            preprocessing_std.as_ref(),
            &calibration_result,
            test_result.as_ref(),
            &limits,
        )?;
        Ok(Simca::from_parts(
            data,
            preprocessing_mean,
            preprocessing_std,
            pca,
            calibration_result,
            test_result,
            limits,
            parameters,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn check_consistency(
    pca: &PcaBasis,
    parameters: &SimcaParameters,
    data: &Array2<f64>,
    mean: &Array1<f64>,
    std_dev: Option<&Array1<f64>>,
    calibration_result: &Projection,
    test_result: Option<&Projection>,
    limits: &DistanceLimits,
) -> Result<(), FormatError> {
    let n_features = pca.n_features();
    let n_comp = parameters.n_comp();
    if data.ncols() != n_features || mean.len() != n_features {
        return Err(FormatError::Inconsistent(format!(
            "model has {} features, but data has {} columns and the mean {} entries",
            n_features,
            data.ncols(),
            mean.len()
        )));
    }
    match (parameters.scale(), std_dev) {
        (true, Some(s)) if s.len() == n_features => {}
        (false, None) => {}
        (scale, std_dev) => {
            return Err(FormatError::Inconsistent(format!(
                "scale={} does not match the stored standard deviation ({})",
                scale,
                std_dev.map_or_else(|| "missing".to_string(), |s| format!("{} entries", s.len()))
            )))
        }
    }
    if n_comp == 0 || n_comp > pca.total_components() {
        return Err(FormatError::Inconsistent(format!(
            "component count {} is outside 1..={}",
            n_comp,
            pca.total_components()
        )));
    }
    let projections = std::iter::once(calibration_result).chain(test_result);
    for projection in projections {
        if projection.n_comp() != n_comp {
            return Err(FormatError::Inconsistent(format!(
                "projection has {} components, parameters ask for {}",
                projection.n_comp(),
                n_comp
            )));
        }
    }
    if limits.n_comp() != n_comp {
        return Err(FormatError::Inconsistent(format!(
            "limits cover {} components, parameters ask for {}",
            limits.n_comp(),
            n_comp
        )));
    }
    Ok(())
}

/// Spellings of non-finite floats in stored model text.
const NON_FINITE_TOKENS: [&str; 3] = ["NaN", "Infinity", "-Infinity"];

/// Index just past the string literal opening at `open`.
fn string_literal_end(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Quotes bare `NaN`, `Infinity` and `-Infinity` tokens outside string literals, so the
/// text parses as strict JSON. String literals are copied unchanged.
fn quote_non_finite(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let (mut copied, mut i) = (0, 0);
    while i < bytes.len() {
        match bytes[i] {
            b'"' => i = string_literal_end(bytes, i),
            b'N' | b'I' | b'-' => match NON_FINITE_TOKENS.iter().find(|t| text[i..].starts_with(**t)) {
                Some(token) => {
                    out.push_str(&text[copied..i]);
                    out.push('"');
                    out.push_str(token);
                    out.push('"');
                    i += token.len();
                    copied = i;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// Inverse of [`quote_non_finite`]: string literals spelling a non-finite float become bare
/// tokens.
fn unquote_non_finite(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let (mut copied, mut i) = (0, 0);
    while i < bytes.len() {
        if bytes[i] != b'"' {
            i += 1;
            continue;
        }
        let end = string_literal_end(bytes, i);
        let content = text.get(i + 1..end.saturating_sub(1)).unwrap_or("");
        if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| **t == content) {
            out.push_str(&text[copied..i]);
            out.push_str(token);
            copied = end;
        }
        i = end;
    }
    out.push_str(&text[copied..]);
    out
}

/// The text of a model.
///
/// Non-finite floats are written as bare `NaN`, `Infinity` and `-Infinity` tokens, the
/// spelling used by stored models; everything else is strict JSON.
pub fn to_text(model: &Simca) -> Result<String, SimcaError> {
    let text = unquote_non_finite(&serde_json::to_string(&SimcaSerializer::to_dict(model))?);
    debug!("Serialized SIMCA model to {} bytes of JSON.", text.len());
    Ok(text)
}

/// Reads a model from text produced by [`to_text`]. Non-finite floats may be bare tokens or
/// quoted strings.
pub fn from_text(text: &str) -> Result<Simca, SimcaError> {
    let value: Value = serde_json::from_str(&quote_non_finite(text))?;
    Ok(SimcaSerializer::from_dict(&value)?)
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scalar type advertised by a feature descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Float32,
    Float64,
    Int64,
    Bool,
}

/// Declared contract for a single observation or action key: either a scalar
/// of a given type or an array of a given shape (e.g. `[480, 640, 3]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSpec {
    Scalar(ValueType),
    Shape(Vec<usize>),
}

/// Feature key to descriptor, iterated in key order.
pub type Features = BTreeMap<String, FeatureSpec>;

/// A captured image, row-major HWC bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a zero-filled frame.
    pub fn blank(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
            data: vec![0u8; (height * width * channels) as usize],
        }
    }

    /// `[height, width, channels]`, matching the `Shape` descriptor cameras
    /// advertise.
    pub fn shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, self.channels as usize]
    }
}

/// Runtime value carried by an observation or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Image(Frame),
}

impl Value {
    /// Numeric view of the value; `None` for images.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Image(_) => None,
        }
    }

    /// Whether the value satisfies `spec`.
    pub fn conforms_to(&self, spec: &FeatureSpec) -> bool {
        match (self, spec) {
            (Value::Float(_), FeatureSpec::Scalar(ValueType::Float32 | ValueType::Float64)) => true,
            (Value::Int(_), FeatureSpec::Scalar(ValueType::Int64)) => true,
            (Value::Bool(_), FeatureSpec::Scalar(ValueType::Bool)) => true,
            (Value::Image(frame), FeatureSpec::Shape(shape)) => frame.shape().as_slice() == shape.as_slice(),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Frame> for Value {
    fn from(frame: Frame) -> Self {
        Value::Image(frame)
    }
}

/// Feature key to value, as returned by `get_observation`.
pub type Observation = BTreeMap<String, Value>;

/// Feature key to value, as accepted and returned by `send_action`.
pub type Action = BTreeMap<String, Value>;

/// Check that `values` provides every key declared in `features` with a
/// conforming value.
///
/// # Errors
///
/// Returns [`RobotError::Config`] naming the first missing or mismatched key.
pub fn validate_against(
    features: &Features,
    values: &BTreeMap<String, Value>,
) -> Result<(), RobotError> {
    for (key, spec) in features {
        match values.get(key) {
            None => return Err(RobotError::Config(format!("missing feature '{key}'"))),
            Some(v) if !v.conforms_to(spec) => {
                return Err(RobotError::Config(format!(
                    "feature '{key}' does not match {spec:?}"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Error type shared by buses, cameras, robots and teleoperators.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotError {
    #[error("{0} is not connected. Run `connect()` first")]
    NotConnected(String),

    #[error("{0} is already connected")]
    AlreadyConnected(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Calibration Error: {0}")]
    Calibration(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RobotError {
    fn from(e: std::io::Error) -> Self {
        RobotError::Io(e.to_string())
    }
}

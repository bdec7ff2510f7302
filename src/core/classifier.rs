//! Window classification.
//!
//! The pipeline treats the model as an opaque function from a feature
//! vector to a probability. [`DenseNetwork`] evaluates a small feed-forward
//! network exported as JSON; any closure `Fn(&[f64]) -> f64` also works.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Probability at or above which a window counts as positive.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Errors raised by a classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable from {path:?}: {reason}")]
    Unavailable { path: PathBuf, reason: String },
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("expected {expected} input features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Scores a feature vector.
pub trait Classifier: Send {
    /// Probability in `[0, 1]` that the window is positive.
    fn predict(&self, input: &[f64]) -> Result<f64, ClassifierError>;

    /// Expected input length, when the model knows it.
    fn input_dim(&self) -> Option<usize> {
        None
    }
}

impl<F> Classifier for F
where
    F: Fn(&[f64]) -> f64 + Send,
{
    fn predict(&self, input: &[f64]) -> Result<f64, ClassifierError> {
        Ok(self(input))
    }
}

/// Turn a probability into a window decision.
pub fn decide(probability: f64) -> bool {
    probability >= DECISION_THRESHOLD
}

/// Layer activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// One fully connected layer as stored in a weights file. `weights[j]`
/// holds the input weights of output unit `j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    fn input_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }
}

/// A layer converted to matrix form for evaluation.
#[derive(Debug, Clone)]
struct MatrixLayer {
    weights: DMatrix<f64>,
    biases: DVector<f64>,
    activation: Activation,
}

impl MatrixLayer {
    fn from_layer(layer: &DenseLayer) -> Self {
        let weights = DMatrix::from_fn(layer.weights.len(), layer.input_dim(), |r, c| {
            layer.weights[r][c]
        });
        Self {
            weights,
            biases: DVector::from_column_slice(&layer.biases),
            activation: layer.activation,
        }
    }

    fn forward(&self, input: &DVector<f64>) -> DVector<f64> {
        let activation = self.activation;
        (&self.weights * input + &self.biases).map(|z| activation.apply(z))
    }
}

/// Serialized form of a [`DenseNetwork`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkWeights {
    layers: Vec<DenseLayer>,
}

/// Feed-forward network ending in a single probability unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "NetworkWeights", into = "NetworkWeights")]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
    matrices: Vec<MatrixLayer>,
}

impl DenseNetwork {
    /// Build a network, checking that layer shapes chain together.
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self, ClassifierError> {
        validate(&layers)?;
        let matrices = layers.iter().map(MatrixLayer::from_layer).collect();
        Ok(Self { layers, matrices })
    }

    /// Load a network from a JSON weights file.
    ///
    /// Any failure is reported as [`ClassifierError::Unavailable`].
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let unavailable = |reason: String| ClassifierError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| unavailable(e.to_string()))
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }
}

impl TryFrom<NetworkWeights> for DenseNetwork {
    type Error = ClassifierError;

    fn try_from(weights: NetworkWeights) -> Result<Self, Self::Error> {
        Self::new(weights.layers)
    }
}

impl From<DenseNetwork> for NetworkWeights {
    fn from(network: DenseNetwork) -> Self {
        Self {
            layers: network.layers,
        }
    }
}

fn validate(layers: &[DenseLayer]) -> Result<(), ClassifierError> {
    let Some(first) = layers.first() else {
        return Err(ClassifierError::InvalidModel("network has no layers".into()));
    };
    if first.input_dim() == 0 {
        return Err(ClassifierError::InvalidModel("first layer has no inputs".into()));
    }

    let mut width = first.input_dim();
    for (index, layer) in layers.iter().enumerate() {
        if layer.weights.len() != layer.biases.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "layer {index}: {} weight rows but {} biases",
                layer.weights.len(),
                layer.biases.len()
            )));
        }
        if layer.weights.iter().any(|row| row.len() != width) {
            return Err(ClassifierError::InvalidModel(format!(
                "layer {index}: expected {width} inputs per unit"
            )));
        }
        width = layer.weights.len();
    }

    if width != 1 {
        return Err(ClassifierError::InvalidModel(format!(
            "output layer has {width} units, expected 1"
        )));
    }
    Ok(())
}

impl Classifier for DenseNetwork {
    fn predict(&self, input: &[f64]) -> Result<f64, ClassifierError> {
        let expected = self.layers.first().map_or(0, DenseLayer::input_dim);
        if input.len() != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                actual: input.len(),
            });
        }

        let output = self
            .matrices
            .iter()
            .fold(DVector::from_column_slice(input), |activations, layer| {
                layer.forward(&activations)
            });

        output
            .iter()
            .next()
            .map(|p| p.clamp(0.0, 1.0))
            .ok_or_else(|| ClassifierError::InvalidModel("empty output".into()))
    }

    fn input_dim(&self) -> Option<usize> {
        self.layers.first().map(DenseLayer::input_dim)
    }
}

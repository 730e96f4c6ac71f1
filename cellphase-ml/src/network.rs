//! Frozen feed-forward network.
//!
//! [`DenseNetwork`] evaluates a stack of fully connected layers with fixed
//! weights. Dropout and batch statistics are training-time concerns and do
//! not appear here. Weights are loaded from JSON:
//!
//! ```json
//! { "layers": [
//!     { "weights": [[0.1, 0.2], [0.3, 0.4]], "bias": [0.0, 0.0], "activation": "relu" },
//!     { "weights": [[1.0, -1.0]], "bias": [0.0], "activation": "softmax" }
//! ] }
//! ```
//!
//! `weights` is `n_out` rows of `n_in` values.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use cellphase_core::{CellphaseError, Result, Summarizable};
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;

/// Layer activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Softmax,
}

/// One fully connected layer: `activation(W x + b)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    pub fn n_inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn n_outputs(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        let mut out: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        apply_activation(self.activation, &mut out);
        out
    }
}

fn apply_activation(activation: Activation, values: &mut [f64]) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::Sigmoid => values.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
        Activation::Softmax => softmax(values),
    }
}

/// Numerically stable softmax in-place.
pub fn softmax(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

#[derive(Deserialize)]
struct NetworkFile {
    layers: Vec<DenseLayer>,
}

/// A multi-layer perceptron with frozen weights.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Build a network, validating that consecutive layer shapes chain.
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "network must have at least one layer".into(),
            ));
        }
        for (i, layer) in layers.iter().enumerate() {
            let n_in = layer.n_inputs();
            if layer.n_outputs() == 0 || n_in == 0 {
                return Err(CellphaseError::InvalidInput(format!(
                    "layer {i} has an empty weight matrix"
                )));
            }
            if let Some(r) = layer.weights.iter().position(|row| row.len() != n_in) {
                return Err(CellphaseError::InvalidInput(format!(
                    "layer {i} weight row {r} has {} values, expected {n_in}",
                    layer.weights[r].len()
                )));
            }
            if layer.bias.len() != layer.n_outputs() {
                return Err(CellphaseError::InvalidInput(format!(
                    "layer {i} bias has {} values, expected {}",
                    layer.bias.len(),
                    layer.n_outputs()
                )));
            }
            if i > 0 && layers[i - 1].n_outputs() != n_in {
                return Err(CellphaseError::InvalidInput(format!(
                    "layer {i} expects {n_in} inputs but layer {} produces {}",
                    i - 1,
                    layers[i - 1].n_outputs()
                )));
            }
        }
        Ok(Self { layers })
    }

    /// Load weights from JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let file: NetworkFile = serde_json::from_reader(BufReader::new(reader))
            .map_err(|e| CellphaseError::Parse(format!("network weights: {e}")))?;
        Self::new(file.layers)
    }

    /// Load weights from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            CellphaseError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Self::from_reader(file)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Run a forward pass. The input length must match the first layer.
    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>> {
        let n_in = self.layers[0].n_inputs();
        if input.len() != n_in {
            return Err(CellphaseError::ShapeMismatch {
                context: "network input",
                expected: n_in,
                found: input.len(),
            });
        }
        let mut x = input.to_vec();
        for layer in &self.layers {
            x = layer.forward(&x);
        }
        Ok(x)
    }
}

impl Classifier for DenseNetwork {
    fn classify(&self, features: &[f64]) -> Result<Vec<f64>> {
        self.forward(features)
    }

    fn input_len(&self) -> Option<usize> {
        Some(self.layers[0].n_inputs())
    }

    fn output_len(&self) -> Option<usize> {
        self.layers.last().map(DenseLayer::n_outputs)
    }
}

impl Summarizable for DenseNetwork {
    fn summary(&self) -> String {
        let dims: Vec<String> = std::iter::once(self.layers[0].n_inputs())
            .chain(self.layers.iter().map(DenseLayer::n_outputs))
            .map(|d| d.to_string())
            .collect();
        format!("DenseNetwork: {}", dims.join(" \u{2192} "))
    }
}

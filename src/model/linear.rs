//! Softmax regression over flattened inputs.
//!
//! The smallest classifier that exposes everything the aggregator can use:
//! its penultimate activations are the flattened input and its output layer
//! is a single dense layer followed by softmax.

use ndarray::{s, Array1, Array2, ArrayViewD};

use super::{flatten_batch, softmax, Classifier, DenseLayer, DEFAULT_INPUT_RESOLUTION};
use crate::error::Result;

/// Linear classifier: `softmax(flatten(x) · W + b)`.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    name: String,
    head: DenseLayer,
    input_resolution: u32,
}

impl LinearClassifier {
    pub fn new(head: DenseLayer) -> Self {
        Self {
            name: "linear".to_string(),
            head,
            input_resolution: DEFAULT_INPUT_RESOLUTION,
        }
    }

    /// Build from a `(features, classes)` weight matrix and a bias vector.
    pub fn from_weights(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        Ok(Self::new(DenseLayer::new(weights, bias)?))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input_resolution(mut self, resolution: u32) -> Self {
        self.input_resolution = resolution;
        self
    }

    pub fn head(&self) -> &DenseLayer {
        &self.head
    }
}

impl Classifier for LinearClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, batch: ArrayViewD<'_, f32>, batch_size: usize) -> anyhow::Result<Array2<f32>> {
        let features = flatten_batch(batch)?;
        let rows = features.nrows();
        let step = batch_size.max(1);
        let mut out = Array2::zeros((rows, self.head.units()));

        for start in (0..rows).step_by(step) {
            let end = (start + step).min(rows);
            let logits = self.head.forward(features.slice(s![start..end, ..]))?;
            out.slice_mut(s![start..end, ..])
                .assign(&softmax(logits.view()));
        }

        Ok(out)
    }

    fn penultimate(&self, batch: ArrayViewD<'_, f32>) -> anyhow::Result<Array2<f32>> {
        flatten_batch(batch)
    }

    fn output_layer(&self) -> Option<&DenseLayer> {
        Some(&self.head)
    }

    fn input_resolution(&self) -> u32 {
        self.input_resolution
    }
}

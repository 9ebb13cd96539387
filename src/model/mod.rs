//! Classifier abstraction.
//!
//! The aggregator never trains or loads models. It talks to them through the
//! [`Classifier`] trait: a batched `predict`, plus optional access to the
//! penultimate activations and the final dense layer. The latter two are
//! what [`LogitHead`] needs to rebuild the network's output without softmax.

pub mod linear;

pub use linear::LinearClassifier;

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD};
use tracing::debug;

use crate::error::{Result, TtaError};

/// Square input side assumed when a classifier does not state one.
pub const DEFAULT_INPUT_RESOLUTION: u32 = 224;

/// A trained image classifier.
///
/// Batches are stacked along axis 0. Predictions have one row per input and
/// one column per class.
pub trait Classifier {
    /// Name used in logs and reports.
    fn name(&self) -> &str {
        "classifier"
    }

    /// Class distributions for every input, computed `batch_size` inputs at a time.
    fn predict(&self, batch: ArrayViewD<'_, f32>, batch_size: usize) -> anyhow::Result<Array2<f32>>;

    /// Activations feeding the final dense layer, one row per input.
    fn penultimate(&self, _batch: ArrayViewD<'_, f32>) -> anyhow::Result<Array2<f32>> {
        anyhow::bail!(
            "classifier '{}' does not expose penultimate activations",
            self.name()
        )
    }

    /// The final dense layer (the one followed by softmax), if inspectable.
    fn output_layer(&self) -> Option<&DenseLayer> {
        None
    }

    /// Side of the square images the classifier expects.
    fn input_resolution(&self) -> u32 {
        DEFAULT_INPUT_RESOLUTION
    }

    /// Number of classes, when known.
    fn num_classes(&self) -> Option<usize> {
        self.output_layer().map(DenseLayer::units)
    }
}

/// Fully connected layer: `x · W + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    /// Shape `(inputs, units)`.
    weights: Array2<f32>,
    /// Shape `(units,)`.
    bias: Array1<f32>,
}

impl DenseLayer {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if bias.len() != weights.ncols() {
            return Err(TtaError::ShapeMismatch(format!(
                "bias has {} values for {} units",
                bias.len(),
                weights.ncols()
            )));
        }
        Ok(Self { weights, bias })
    }

    /// A layer with all weights and biases at zero.
    pub fn zeros(inputs: usize, units: usize) -> Self {
        Self {
            weights: Array2::zeros((inputs, units)),
            bias: Array1::zeros(units),
        }
    }

    pub fn input_width(&self) -> usize {
        self.weights.nrows()
    }

    pub fn units(&self) -> usize {
        self.weights.ncols()
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    /// Replace the parameters; shapes must stay the same.
    pub fn set_weights(&mut self, weights: Array2<f32>, bias: Array1<f32>) -> Result<()> {
        if weights.dim() != self.weights.dim() || bias.len() != self.bias.len() {
            return Err(TtaError::ShapeMismatch(format!(
                "cannot load weights {:?} / bias {} into a {}x{} layer",
                weights.dim(),
                bias.len(),
                self.input_width(),
                self.units()
            )));
        }
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    pub fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.input_width() {
            return Err(TtaError::ShapeMismatch(format!(
                "dense layer expects {} features, got {}",
                self.input_width(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.weights) + &self.bias)
    }
}

/// One row per input, holding the input's values in logical order.
pub fn flatten_batch(batch: ArrayViewD<'_, f32>) -> anyhow::Result<Array2<f32>> {
    let (&samples, rest) = batch
        .shape()
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("batch has no sample axis"))?;
    let features: usize = rest.iter().product();

    Ok(Array2::from_shape_vec(
        (samples, features),
        batch.iter().copied().collect(),
    )?)
}

/// Row-wise softmax.
pub fn softmax(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// Pre-softmax output of a classifier.
///
/// Built from a copy of the classifier's final dense layer: a fresh
/// projection with the same shape receives the final layer's weights, and
/// is applied to the penultimate activations. The result is the logits the
/// classifier would have fed into softmax.
#[derive(Debug, Clone)]
pub struct LogitHead {
    projection: DenseLayer,
}

impl LogitHead {
    /// Derive the head for `classifier`. Must be redone for every new classifier.
    pub fn derive(classifier: &dyn Classifier) -> Result<Self> {
        let source = classifier
            .output_layer()
            .ok_or_else(|| TtaError::PreSoftmaxUnavailable(classifier.name().to_string()))?;

        let mut projection = DenseLayer::zeros(source.input_width(), source.units());
        projection.set_weights(source.weights().clone(), source.bias().clone())?;

        debug!(
            "Derived pre-softmax head for '{}': {} -> {}",
            classifier.name(),
            projection.input_width(),
            projection.units()
        );

        Ok(Self { projection })
    }

    /// Number of logits produced per input.
    pub fn output_width(&self) -> usize {
        self.projection.units()
    }

    /// Logits for every input of `batch`.
    pub fn logits(
        &self,
        classifier: &dyn Classifier,
        batch: ArrayViewD<'_, f32>,
    ) -> Result<Array2<f32>> {
        let features = classifier.penultimate(batch).map_err(TtaError::Classifier)?;
        self.projection.forward(features.view())
    }
}

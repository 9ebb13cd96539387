//! Test-time augmentation for image classifiers.
//!
//! Wrap a trained [`Classifier`] in a [`TtaModel`] to score augmented copies
//! of each sample together: every group of `n` copies is run through the
//! classifier, optionally trimmed of outlier copies, and averaged into one
//! prediction. Inputs are either stacked tensors or a labeled directory of
//! augmented images, in which case the aggregated predictions are scored
//! against the class directories.
//!
//! ```no_run
//! use ndarray::{array, Array1};
//! use tta_aggregator::{LinearClassifier, TtaConfig, TtaModel};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let classifier = LinearClassifier::from_weights(array![[1.0f32, -1.0]], Array1::zeros(2))?;
//! let mut model = TtaModel::new(classifier, &TtaConfig::with_group_size(4))?;
//! let accuracy = model.predict_directory("data/valid")?;
//! println!("TTA accuracy: {:.2}%", accuracy * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod models;
pub mod report;
pub mod scanner;
pub mod tta;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, NormalizationStats, ReportConfig, ScannerConfig, TtaConfig};
pub use error::{Result, TtaError};
pub use loader::{ImageLoader, RgbImageLoader};
pub use model::{Classifier, DenseLayer, LinearClassifier, LogitHead};
pub use models::{ClassIndex, EvaluationReport, LoadedDataset};
pub use scanner::{DatasetScanner, ScanConfig};
pub use tta::{TtaInput, TtaModel, TtaOutput};

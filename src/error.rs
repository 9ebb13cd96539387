//! Error types for the aggregation engine.
//!
//! Every failure aborts the whole `predict` call it happens in; nothing here
//! is retried or turned into a partial result.

use std::path::PathBuf;
use thiserror::Error;

use crate::scanner::filename::FilenameError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TtaError>;

/// Errors raised while configuring the aggregator or running a prediction.
#[derive(Debug, Error)]
pub enum TtaError {
    /// The input cannot be interpreted as a batch or a dataset root.
    #[error("unsupported input for predict: {0}")]
    UnsupportedInput(String),

    /// An image file does not follow the `<stem>[<param>]<index>.<ext>` convention.
    #[error("cannot parse augmented file name {path}: {source}")]
    FilenameParse {
        path: PathBuf,
        #[source]
        source: FilenameError,
    },

    /// A group member synthesized from a base name does not exist on disk.
    #[error("augmentation group member is missing: {path}")]
    MissingMember { path: PathBuf },

    /// Outlier exclusion would remove the whole group (or more).
    #[error("outlier exclusion count {exclude} must be smaller than the group size {group_size}")]
    OutlierRange { exclude: usize, group_size: usize },

    /// The group size must be positive.
    #[error("group size must be at least 1")]
    InvalidGroupSize,

    /// Only one of mean / std was supplied.
    #[error("normalization needs both mean and std, got only {present}")]
    IncompleteNormalization { present: &'static str },

    #[error("invalid normalization statistics: {0}")]
    InvalidNormalization(String),

    /// `predict_on_loaded_files` was called before any directory was scanned.
    #[error("no dataset has been loaded; run predict on a directory first")]
    NoLoadedDataset,

    /// The group size changed after the dataset was scanned.
    #[error("loaded dataset was scanned with group size {loaded}, aggregator now uses {current}")]
    GroupSizeMismatch { loaded: usize, current: usize },

    #[error("no augmentation groups found under {0}")]
    EmptyDataset(PathBuf),

    /// The classifier does not expose the layers needed to rebuild its logits.
    #[error("classifier '{0}' does not expose a final dense layer for pre-softmax extraction")]
    PreSoftmaxUnavailable(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("classifier inference failed")]
    Classifier(#[source] anyhow::Error),

    #[error("failed to load image {path}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl From<ndarray::ShapeError> for TtaError {
    fn from(err: ndarray::ShapeError) -> Self {
        TtaError::ShapeMismatch(err.to_string())
    }
}

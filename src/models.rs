//! Data models for the aggregation engine.
//!
//! This module contains the structures describing a scanned dataset
//! (augmentation groups, samples, class indices) and the evaluation
//! report produced when a classifier is scored against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The augmented copies of one logical sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentationGroup {
    /// Name shared by every member, up to the augmentation index.
    pub base_name: String,
    /// Member files in augmentation index order.
    pub members: Vec<PathBuf>,
}

impl AugmentationGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One augmentation group with its ground-truth class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub group: AugmentationGroup,
    /// Name of the class directory the group was found in.
    pub label: String,
}

/// Stable mapping from class name to integer index.
///
/// Indices follow the lexicographic order of the class names, so the
/// mapping never depends on the order the filesystem returns entries in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIndex {
    names: Vec<String>,
}

impl ClassIndex {
    /// Build an index from class names in any order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The mapping as an ordered map, for display and serialization.
    pub fn to_map(&self) -> BTreeMap<String, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect()
    }
}

/// Result of scanning a labeled directory of augmented images.
///
/// Kept on the aggregator so another classifier can be scored against the
/// same groups without rescanning. The files must not change in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedDataset {
    pub root: PathBuf,
    /// Group size the groups were synthesized with.
    pub group_size: usize,
    pub class_index: ClassIndex,
    /// Samples in discovery order.
    pub samples: Vec<Sample>,
}

impl LoadedDataset {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of augmentation groups.
    pub fn num_groups(&self) -> usize {
        self.samples.len()
    }

    /// Number of image files across all groups.
    pub fn num_images(&self) -> usize {
        self.samples.iter().map(|s| s.group.len()).sum()
    }

    pub fn num_classes(&self) -> usize {
        self.class_index.len()
    }

    /// All member files, group after group.
    pub fn filenames(&self) -> impl Iterator<Item = &Path> {
        self.samples
            .iter()
            .flat_map(|s| s.group.members.iter().map(PathBuf::as_path))
    }

    /// Ground-truth label of every group, in discovery order.
    pub fn ground_truth(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.label.as_str())
    }
}

/// Outcome of the aggregated prediction for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub base_name: String,
    pub label: String,
    pub label_index: usize,
    pub predicted_index: usize,
    /// Class name of the prediction, when the index maps to a known class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_label: Option<String>,
    /// Aggregated score of the predicted class.
    pub confidence: f32,
    pub correct: bool,
    /// Copies whose own arg-max matched the label, before outlier exclusion.
    pub copies_correct: usize,
    pub copies: usize,
}

/// Accuracy restricted to one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAccuracy {
    pub label: String,
    pub samples: usize,
    pub correct: usize,
    pub accuracy: f64,
}

/// Metadata about an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub dataset_root: PathBuf,
    pub evaluated_at: DateTime<Utc>,
    pub classifier: String,
    pub group_size: usize,
    pub exclude_outliers: usize,
    pub use_pre_softmax: bool,
    pub num_groups: usize,
    pub num_images: usize,
    pub num_classes: usize,
    pub duration_seconds: f64,
}

/// Full result of scoring a classifier against a loaded dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metadata: ReportMetadata,
    /// Fraction of groups whose aggregated arg-max matched the label.
    pub accuracy: f64,
    /// Fraction of individual copies whose own arg-max matched the label.
    pub baseline_accuracy: f64,
    pub per_class: Vec<ClassAccuracy>,
    pub samples: Vec<SampleOutcome>,
}

impl EvaluationReport {
    /// Accuracy gained by aggregating over the augmented copies.
    pub fn improvement(&self) -> f64 {
        self.accuracy - self.baseline_accuracy
    }

    /// Samples whose aggregated prediction was wrong.
    pub fn misclassified(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.samples.iter().filter(|s| !s.correct)
    }
}

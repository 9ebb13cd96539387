//! Configuration file handling.
//!
//! This module handles loading `.tta.toml` files and validating the
//! aggregator settings they carry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TtaError;

/// Name of the configuration file looked up by default.
pub const CONFIG_FILE_NAME: &str = ".tta.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Aggregation settings.
    #[serde(default)]
    pub tta: TtaConfig,

    /// Dataset scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Evaluation report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Per-channel (or scalar) normalization statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl NormalizationStats {
    /// Build validated statistics. Both vectors need the same length and
    /// `std` may not contain zeros.
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Result<Self, TtaError> {
        if mean.is_empty() || std.is_empty() {
            return Err(TtaError::InvalidNormalization(
                "mean and std must not be empty".to_string(),
            ));
        }
        if mean.len() != std.len() {
            return Err(TtaError::InvalidNormalization(format!(
                "mean has {} values but std has {}",
                mean.len(),
                std.len()
            )));
        }
        if std.iter().any(|s| *s == 0.0) {
            return Err(TtaError::InvalidNormalization(
                "std contains a zero".to_string(),
            ));
        }
        Ok(Self { mean, std })
    }

    /// Same statistic for every channel.
    pub fn scalar(mean: f32, std: f32) -> Result<Self, TtaError> {
        Self::new(vec![mean], vec![std])
    }

    /// Number of channels covered, 1 meaning broadcast to all.
    pub fn channels(&self) -> usize {
        self.mean.len()
    }
}

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtaConfig {
    /// Augmented copies per sample.
    #[serde(default = "default_group_size")]
    pub n: usize,

    /// Per-channel mean subtracted before inference.
    #[serde(default)]
    pub mean: Option<Vec<f32>>,

    /// Per-channel standard deviation divided by before inference.
    #[serde(default)]
    pub std: Option<Vec<f32>>,

    /// Average logits instead of softmax probabilities.
    #[serde(default)]
    pub use_pre_softmax: bool,

    /// Copies trimmed from each group before averaging.
    #[serde(default)]
    pub exclude_outliers: usize,
}

impl Default for TtaConfig {
    fn default() -> Self {
        Self {
            n: default_group_size(),
            mean: None,
            std: None,
            use_pre_softmax: false,
            exclude_outliers: 0,
        }
    }
}

fn default_group_size() -> usize {
    4
}

impl TtaConfig {
    /// Settings for groups of `n` copies and nothing else enabled.
    pub fn with_group_size(n: usize) -> Self {
        Self {
            n,
            ..Self::default()
        }
    }

    /// Check the group size, the exclusion range and the normalization pair.
    pub fn validate(&self) -> Result<(), TtaError> {
        validate_group(self.n, self.exclude_outliers)?;
        self.normalization()?;
        Ok(())
    }

    /// The normalization statistics, if both halves are configured.
    pub fn normalization(&self) -> Result<Option<NormalizationStats>, TtaError> {
        normalization_pair(self.mean.clone(), self.std.clone())
    }
}

/// `n > 0` and `exclude < n`.
pub(crate) fn validate_group(n: usize, exclude: usize) -> Result<(), TtaError> {
    if n == 0 {
        return Err(TtaError::InvalidGroupSize);
    }
    if exclude >= n {
        return Err(TtaError::OutlierRange {
            exclude,
            group_size: n,
        });
    }
    Ok(())
}

/// Both or neither of mean / std.
pub(crate) fn normalization_pair(
    mean: Option<Vec<f32>>,
    std: Option<Vec<f32>>,
) -> Result<Option<NormalizationStats>, TtaError> {
    match (mean, std) {
        (Some(mean), Some(std)) => NormalizationStats::new(mean, std).map(Some),
        (None, None) => Ok(None),
        (Some(_), None) => Err(TtaError::IncompleteNormalization { present: "mean" }),
        (None, Some(_)) => Err(TtaError::IncompleteNormalization { present: "std" }),
    }
}

/// Dataset scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Image extensions considered part of a dataset (case-insensitive).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to skip.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Check that every synthesized group member exists while scanning.
    #[serde(default = "default_true")]
    pub verify_members: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            excludes: Vec::new(),
            verify_members: true,
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["png", "jpg", "jpeg", "bmp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

/// Evaluation report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Show a progress bar while groups are evaluated.
    #[serde(default)]
    pub show_progress: bool,

    /// Include one row per sample in Markdown reports.
    #[serde(default = "default_true")]
    pub include_samples: bool,

    /// Maximum misclassified samples listed in Markdown reports.
    #[serde(default = "default_max_listed")]
    pub max_listed_errors: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            show_progress: false,
            include_samples: true,
            max_listed_errors: default_max_listed(),
        }
    }
}

fn default_max_listed() -> usize {
    20
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .tta
            .validate()
            .with_context(|| format!("Invalid [tta] settings in {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load configuration from a directory, e.g. a dataset root.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

//! Dataset scanner for discovering augmentation groups.
//!
//! A dataset root holds one subdirectory per class. Each class directory
//! holds the augmented copies of its samples, named after the convention in
//! [`filename`]. Scanning turns that tree into a [`LoadedDataset`].

pub mod filename;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::error::{Result, TtaError};
use crate::models::{AugmentationGroup, ClassIndex, LoadedDataset, Sample};
use filename::AugmentedName;

/// Configuration for dataset scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Image extensions to include, lowercase, without the dot.
    pub extensions: Vec<String>,
    /// Names to skip, on top of hidden entries.
    pub excludes: Vec<String>,
    /// Fail the scan when a synthesized member is absent.
    pub verify_members: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            excludes: config.excludes.clone(),
            verify_members: config.verify_members,
        }
    }
}

/// Scanner turning a labeled directory tree into augmentation groups.
pub struct DatasetScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl DatasetScanner {
    /// Create a new scanner for a dataset root.
    pub fn new(root: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    /// Class names under the root, sorted.
    pub fn list_classes(&self) -> Result<Vec<String>> {
        let mut classes = Vec::new();

        for entry in sorted_entries(&self.root)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if self.is_excluded(&name) {
                continue;
            }
            if entry.file_type().is_dir() {
                classes.push(name);
            }
        }

        Ok(classes)
    }

    /// Scan the tree, synthesizing groups of `group_size` members.
    pub fn scan(&self, group_size: usize) -> Result<LoadedDataset> {
        if group_size == 0 {
            return Err(TtaError::InvalidGroupSize);
        }

        let classes = self.list_classes()?;
        let mut samples = Vec::new();

        for class in &classes {
            let class_dir = self.root.join(class);
            let before = samples.len();
            self.scan_class(&class_dir, class, group_size, &mut samples)?;
            debug!(
                "Class '{}': {} augmentation groups",
                class,
                samples.len() - before
            );
        }

        let dataset = LoadedDataset {
            root: self.root.clone(),
            group_size,
            class_index: ClassIndex::from_names(classes),
            samples,
        };

        info!(
            "Found {} images augmented {} times belonging to {} classes",
            dataset.num_groups(),
            group_size,
            dataset.num_classes()
        );

        Ok(dataset)
    }

    /// Collect the groups of one class directory.
    fn scan_class(
        &self,
        class_dir: &Path,
        class: &str,
        group_size: usize,
        samples: &mut Vec<Sample>,
    ) -> Result<()> {
        let mut recorded: HashSet<String> = HashSet::new();

        for entry in sorted_entries(class_dir)? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if self.is_excluded(&name) || !entry.file_type().is_file() {
                continue;
            }
            if !self.matches_extension(path) {
                debug!("Skipping non-image file {}", path.display());
                continue;
            }

            let parsed =
                AugmentedName::from_path(path).map_err(|source| TtaError::FilenameParse {
                    path: path.to_path_buf(),
                    source,
                })?;

            let base_name = parsed.base_name();
            if !recorded.insert(base_name.clone()) {
                continue;
            }

            let members: Vec<PathBuf> = parsed
                .member_names(group_size)
                .into_iter()
                .map(|member| class_dir.join(member))
                .collect();

            if self.config.verify_members {
                if let Some(missing) = members.iter().find(|m| !m.is_file()) {
                    return Err(TtaError::MissingMember {
                        path: missing.clone(),
                    });
                }
            }

            samples.push(Sample {
                group: AugmentationGroup { base_name, members },
                label: class.to_string(),
            });
        }

        Ok(())
    }

    /// Check the extension against the configured image types.
    fn matches_extension(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        self.config.extensions.contains(&ext)
    }

    /// Check if a name matches exclusion patterns.
    fn is_excluded(&self, name: &str) -> bool {
        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern)
    }
}

/// Immediate children of a directory, sorted by file name.
fn sorted_entries(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.map_err(TtaError::from))
        .collect()
}

//! Test-time augmentation aggregator.
//!
//! [`TtaModel`] wraps a trained [`Classifier`] and scores augmented copies of
//! each sample together. Copies of one sample form a group of `n`; each group
//! is run through the classifier, optionally trimmed of outlier copies, and
//! averaged into a single prediction.
//!
//! Two input modes are supported:
//! - stacked tensors, where every consecutive block of `n` inputs is a group;
//! - a labeled directory tree, where groups are discovered from file names and
//!   the aggregated predictions are scored against the class directories.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array, Array1, Array2, ArrayD, ArrayViewD, Axis, Dimension, Slice};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::{
    accuracy, aggregate_group, argmax, baseline_accuracy, count_correct_copies,
    per_class_accuracy,
};
use crate::config::{normalization_pair, validate_group, Config, NormalizationStats, TtaConfig};
use crate::error::{Result, TtaError};
use crate::loader::{load_and_normalize, ImageLoader, RgbImageLoader};
use crate::model::{Classifier, LogitHead};
use crate::models::{
    AugmentationGroup, ClassIndex, EvaluationReport, LoadedDataset, ReportMetadata, SampleOutcome,
};
use crate::scanner::{DatasetScanner, ScanConfig};

/// What `predict` can be called on.
#[derive(Debug, Clone)]
pub enum TtaInput {
    /// Stacked inputs, axis 0 enumerating the augmented copies.
    Batch(ArrayD<f32>),
    /// Root of a labeled directory tree.
    Directory(PathBuf),
}

impl<D: Dimension> From<Array<f32, D>> for TtaInput {
    fn from(batch: Array<f32, D>) -> Self {
        TtaInput::Batch(batch.into_dyn())
    }
}

impl From<PathBuf> for TtaInput {
    fn from(path: PathBuf) -> Self {
        TtaInput::Directory(path)
    }
}

impl From<&Path> for TtaInput {
    fn from(path: &Path) -> Self {
        TtaInput::Directory(path.to_path_buf())
    }
}

impl From<&str> for TtaInput {
    fn from(path: &str) -> Self {
        TtaInput::Directory(PathBuf::from(path))
    }
}

/// What `predict` returns, matching the input mode.
#[derive(Debug, Clone, PartialEq)]
pub enum TtaOutput {
    /// One aggregated vector per complete group.
    Predictions(Array2<f32>),
    /// Fraction of groups classified correctly.
    Accuracy(f64),
}

impl TtaOutput {
    pub fn predictions(&self) -> Option<&Array2<f32>> {
        match self {
            TtaOutput::Predictions(preds) => Some(preds),
            TtaOutput::Accuracy(_) => None,
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        match self {
            TtaOutput::Accuracy(acc) => Some(*acc),
            TtaOutput::Predictions(_) => None,
        }
    }

    pub fn into_predictions(self) -> Option<Array2<f32>> {
        match self {
            TtaOutput::Predictions(preds) => Some(preds),
            TtaOutput::Accuracy(_) => None,
        }
    }
}

/// A classifier together with the logit head derived from it.
///
/// Replaced as a unit so the head can never describe a different network.
struct ClassifierBinding {
    classifier: Box<dyn Classifier>,
    logit_head: Option<LogitHead>,
}

impl ClassifierBinding {
    fn bind(classifier: Box<dyn Classifier>, use_pre_softmax: bool) -> Result<Self> {
        let logit_head = if use_pre_softmax {
            Some(LogitHead::derive(classifier.as_ref())?)
        } else {
            None
        };
        Ok(Self {
            classifier,
            logit_head,
        })
    }

    /// Per-copy outputs for one group: logits when a head is bound,
    /// probabilities otherwise.
    fn infer(&self, block: ArrayViewD<'_, f32>, batch_size: usize) -> Result<Array2<f32>> {
        let outputs = match &self.logit_head {
            Some(head) => head.logits(self.classifier.as_ref(), block)?,
            None => self
                .classifier
                .predict(block, batch_size)
                .map_err(TtaError::Classifier)?,
        };

        if outputs.nrows() != batch_size {
            return Err(TtaError::ShapeMismatch(format!(
                "classifier returned {} rows for a group of {}",
                outputs.nrows(),
                batch_size
            )));
        }
        Ok(outputs)
    }
}

/// Per-copy outputs of one group and their aggregate.
struct GroupPrediction {
    copies: Array2<f32>,
    aggregated: Array1<f32>,
}

/// Test-time augmentation wrapper around a classifier.
pub struct TtaModel {
    binding: ClassifierBinding,
    n: usize,
    normalization: Option<NormalizationStats>,
    use_pre_softmax: bool,
    exclude_outliers: usize,
    loader: Box<dyn ImageLoader>,
    scan_config: ScanConfig,
    show_progress: bool,
    loaded: Option<LoadedDataset>,
}

impl TtaModel {
    /// Wrap `classifier` with validated settings.
    pub fn new<C: Classifier + 'static>(classifier: C, config: &TtaConfig) -> Result<Self> {
        config.validate()?;
        let binding = ClassifierBinding::bind(Box::new(classifier), config.use_pre_softmax)?;

        Ok(Self {
            binding,
            n: config.n,
            normalization: config.normalization()?,
            use_pre_softmax: config.use_pre_softmax,
            exclude_outliers: config.exclude_outliers,
            loader: Box::new(RgbImageLoader::default()),
            scan_config: ScanConfig::default(),
            show_progress: false,
            loaded: None,
        })
    }

    /// Wrap `classifier` with every section of a loaded configuration file.
    pub fn from_config<C: Classifier + 'static>(classifier: C, config: &Config) -> Result<Self> {
        Ok(Self::new(classifier, &config.tta)?
            .with_scan_config(ScanConfig::from(&config.scanner))
            .with_progress(config.report.show_progress))
    }

    /// Use another image decoder for directory mode.
    pub fn with_loader<L: ImageLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_scan_config(mut self, scan_config: ScanConfig) -> Self {
        self.scan_config = scan_config;
        self
    }

    /// Show a progress bar while groups are evaluated.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    // Mutators

    /// Replace the classifier, re-deriving the logit head when needed.
    ///
    /// On error the previous classifier stays in place.
    pub fn set_classifier<C: Classifier + 'static>(&mut self, classifier: C) -> Result<()> {
        let binding = ClassifierBinding::bind(Box::new(classifier), self.use_pre_softmax)?;
        info!("Classifier set to '{}'", binding.classifier.name());
        self.binding = binding;
        Ok(())
    }

    pub fn set_group_size(&mut self, n: usize) -> Result<()> {
        validate_group(n, self.exclude_outliers)?;
        self.n = n;
        Ok(())
    }

    pub fn set_exclude_outliers(&mut self, exclude: usize) -> Result<()> {
        validate_group(self.n, exclude)?;
        self.exclude_outliers = exclude;
        Ok(())
    }

    /// Replace the normalization statistics; `None` means divide by 255.
    pub fn set_normalization(&mut self, stats: Option<NormalizationStats>) {
        self.normalization = stats;
    }

    /// Replace the normalization statistics from a mean / std pair.
    pub fn set_mean_std(&mut self, mean: Option<Vec<f32>>, std: Option<Vec<f32>>) -> Result<()> {
        self.normalization = normalization_pair(mean, std)?;
        Ok(())
    }

    /// Switch between averaging logits and averaging probabilities.
    pub fn set_use_pre_softmax(&mut self, use_pre_softmax: bool) -> Result<()> {
        self.binding.logit_head = if use_pre_softmax {
            Some(LogitHead::derive(self.binding.classifier.as_ref())?)
        } else {
            None
        };
        self.use_pre_softmax = use_pre_softmax;
        Ok(())
    }

    // Accessors

    pub fn classifier(&self) -> &dyn Classifier {
        self.binding.classifier.as_ref()
    }

    pub fn group_size(&self) -> usize {
        self.n
    }

    pub fn exclude_outliers(&self) -> usize {
        self.exclude_outliers
    }

    pub fn use_pre_softmax(&self) -> bool {
        self.use_pre_softmax
    }

    pub fn normalization(&self) -> Option<&NormalizationStats> {
        self.normalization.as_ref()
    }

    /// The dataset found by the last directory-mode call, if any.
    pub fn loaded_dataset(&self) -> Option<&LoadedDataset> {
        self.loaded.as_ref()
    }

    /// Class name to index mapping of the loaded dataset.
    pub fn class_indices(&self) -> Option<&ClassIndex> {
        self.loaded.as_ref().map(|d| &d.class_index)
    }

    /// Width of the bound logit head, when pre-softmax aggregation is on.
    pub fn logit_width(&self) -> Option<usize> {
        self.binding.logit_head.as_ref().map(LogitHead::output_width)
    }

    // Prediction

    /// Predict on a batch or a directory.
    pub fn predict(&mut self, input: impl Into<TtaInput>) -> Result<TtaOutput> {
        match input.into() {
            TtaInput::Batch(batch) => self.predict_batch(batch.view()).map(TtaOutput::Predictions),
            TtaInput::Directory(root) => self.predict_directory(&root).map(TtaOutput::Accuracy),
        }
    }

    /// Aggregate stacked inputs group by group.
    ///
    /// Inputs past the last complete group are dropped.
    pub fn predict_batch(&self, batch: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
        if batch.ndim() == 0 {
            return Err(TtaError::UnsupportedInput(
                "a rank-0 tensor has no sample axis".to_string(),
            ));
        }

        let total = batch.len_of(Axis(0));
        let groups = total / self.n;
        let remainder = total % self.n;
        if remainder != 0 {
            warn!(
                "Dropping {} trailing inputs that do not fill a group of {}",
                remainder, self.n
            );
        }

        let mut rows = Vec::with_capacity(groups);
        for g in 0..groups {
            let block = batch.slice_axis(Axis(0), Slice::from(g * self.n..(g + 1) * self.n));
            rows.push(self.predict_group(block)?.aggregated);
        }

        if rows.is_empty() {
            let width = self
                .logit_width()
                .or_else(|| self.classifier().num_classes())
                .unwrap_or(0);
            return Ok(Array2::zeros((0, width)));
        }

        let views: Vec<_> = rows.iter().map(|row| row.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    /// Scan `root`, keep the dataset and return the TTA accuracy on it.
    pub fn predict_directory(&mut self, root: impl AsRef<Path>) -> Result<f64> {
        Ok(self.evaluate_directory(root)?.accuracy)
    }

    /// Re-score the loaded dataset with the current classifier and settings.
    pub fn predict_on_loaded_files(&self) -> Result<f64> {
        Ok(self.evaluate_loaded_files()?.accuracy)
    }

    /// Scan `root`, keep the dataset and evaluate the classifier on it.
    pub fn evaluate_directory(&mut self, root: impl AsRef<Path>) -> Result<EvaluationReport> {
        self.loaded = None;

        let scanner = DatasetScanner::new(root.as_ref(), self.scan_config.clone());
        self.loaded = Some(scanner.scan(self.n)?);

        self.evaluate_loaded_files()
    }

    /// Evaluate the classifier on the loaded dataset.
    pub fn evaluate_loaded_files(&self) -> Result<EvaluationReport> {
        let dataset = self.loaded.as_ref().ok_or(TtaError::NoLoadedDataset)?;

        if dataset.group_size != self.n {
            return Err(TtaError::GroupSizeMismatch {
                loaded: dataset.group_size,
                current: self.n,
            });
        }
        if dataset.samples.is_empty() {
            return Err(TtaError::EmptyDataset(dataset.root.clone()));
        }

        let start_time = Instant::now();
        let resolution = self.classifier().input_resolution();
        let progress = self.progress_bar(dataset.num_groups() as u64);
        let mut outcomes = Vec::with_capacity(dataset.num_groups());

        for sample in &dataset.samples {
            let label_index = dataset.class_index.index_of(&sample.label).ok_or_else(|| {
                TtaError::UnsupportedInput(format!(
                    "sample label '{}' is not a known class",
                    sample.label
                ))
            })?;

            let block = self.load_group(&sample.group, resolution)?;
            let group = self.predict_group(block.view())?;
            let predicted_index = argmax(group.aggregated.view()).ok_or_else(|| {
                TtaError::ShapeMismatch("classifier returned no class scores".to_string())
            })?;

            let outcome = SampleOutcome {
                base_name: sample.group.base_name.clone(),
                label: sample.label.clone(),
                label_index,
                predicted_index,
                predicted_label: dataset.class_index.name_of(predicted_index).map(String::from),
                confidence: group.aggregated[predicted_index],
                correct: predicted_index == label_index,
                copies_correct: count_correct_copies(group.copies.view(), label_index),
                copies: group.copies.nrows(),
            };

            debug!(
                "{}/{}: predicted {} (label {}), {}/{} copies correct",
                sample.label,
                outcome.base_name,
                predicted_index,
                label_index,
                outcome.copies_correct,
                outcome.copies
            );

            outcomes.push(outcome);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let tta_accuracy = accuracy(&outcomes);
        let baseline = baseline_accuracy(&outcomes);
        info!(
            "TTA accuracy {:.2}% over {} groups, single copies {:.2}% ({:+.2}%)",
            tta_accuracy * 100.0,
            outcomes.len(),
            baseline * 100.0,
            (tta_accuracy - baseline) * 100.0
        );

        Ok(EvaluationReport {
            metadata: ReportMetadata {
                dataset_root: dataset.root.clone(),
                evaluated_at: Utc::now(),
                classifier: self.classifier().name().to_string(),
                group_size: self.n,
                exclude_outliers: self.exclude_outliers,
                use_pre_softmax: self.use_pre_softmax,
                num_groups: dataset.num_groups(),
                num_images: dataset.num_images(),
                num_classes: dataset.num_classes(),
                duration_seconds: start_time.elapsed().as_secs_f64(),
            },
            accuracy: tta_accuracy,
            baseline_accuracy: baseline,
            per_class: per_class_accuracy(&outcomes, &dataset.class_index),
            samples: outcomes,
        })
    }

    /// Inference, outlier exclusion and averaging for one group of `n` inputs.
    fn predict_group(&self, block: ArrayViewD<'_, f32>) -> Result<GroupPrediction> {
        let copies = self.binding.infer(block, self.n)?;
        let aggregated = aggregate_group(copies.view(), self.exclude_outliers)?;
        Ok(GroupPrediction { copies, aggregated })
    }

    /// Load and normalize every member, stacked along a new sample axis.
    fn load_group(&self, group: &AugmentationGroup, resolution: u32) -> Result<ArrayD<f32>> {
        let images = group
            .members
            .iter()
            .map(|path| {
                load_and_normalize(
                    self.loader.as_ref(),
                    path,
                    resolution,
                    self.normalization.as_ref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<_> = images.iter().map(|image| image.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?.into_dyn())
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} groups ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearClassifier;
    use crate::testing::{init_tracing, write_group, EchoClassifier, TextLoader};
    use image::{Rgb, RgbImage};
    use ndarray::{arr0, array, Array3};
    use tempfile::TempDir;

    fn two_class() -> LinearClassifier {
        LinearClassifier::from_weights(array![[1.0f32, -1.0], [-1.0, 1.0]], array![0.0, 0.0])
            .unwrap()
    }

    fn assert_close(actual: &Array2<f32>, expected: &Array2<f32>) {
        assert_eq!(actual.dim(), expected.dim());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "{} != {}", a, e);
        }
    }

    /// `jump` (index 0) is right on every copy; `walk` (index 1) is right
    /// only on its single overconfident copy.
    fn motion_dataset() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        write_group(
            &temp_dir.path().join("jump"),
            "clip[0.5]",
            &[&[0.8, 0.2], &[0.7, 0.3], &[0.9, 0.1]],
        );
        write_group(
            &temp_dir.path().join("walk"),
            "clip[0.5]",
            &[&[0.6, 0.4], &[0.6, 0.4], &[0.01, 0.99]],
        );
        temp_dir
    }

    fn echo_model(n: usize, exclude: usize) -> TtaModel {
        let config = TtaConfig {
            exclude_outliers: exclude,
            mean: Some(vec![0.0]),
            std: Some(vec![1.0]),
            ..TtaConfig::with_group_size(n)
        };
        TtaModel::new(EchoClassifier::default(), &config)
            .unwrap()
            .with_loader(TextLoader)
    }

    #[test]
    fn test_batch_average_matches_individual_predictions() {
        let classifier = two_class();
        let batch = Array3::from_shape_vec(
            (4, 1, 2),
            vec![2.0f32, 0.0, 0.5, 0.0, 0.0, 1.0, 0.3, 0.2],
        )
        .unwrap();
        let individual = classifier.predict(batch.view().into_dyn(), 4).unwrap();

        let model = TtaModel::new(classifier, &TtaConfig::with_group_size(2)).unwrap();
        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();

        let expected = array![
            [
                (individual[[0, 0]] + individual[[1, 0]]) / 2.0,
                (individual[[0, 1]] + individual[[1, 1]]) / 2.0
            ],
            [
                (individual[[2, 0]] + individual[[3, 0]]) / 2.0,
                (individual[[2, 1]] + individual[[3, 1]]) / 2.0
            ],
        ];
        assert_close(&preds, &expected);
    }

    #[test]
    fn test_trailing_inputs_are_dropped() {
        init_tracing();
        let model = echo_model(3, 0);
        let batch = Array2::from_shape_vec((7, 2), (0..14).map(|v| v as f32).collect()).unwrap();

        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();
        assert_eq!(preds.nrows(), 2);
        assert_close(&preds, &array![[2.0f32, 3.0], [8.0, 9.0]]);

        let exact = Array2::<f32>::zeros((6, 2));
        assert_eq!(model.predict_batch(exact.view().into_dyn()).unwrap().nrows(), 2);
    }

    #[test]
    fn test_short_batch_yields_no_groups() {
        let model = TtaModel::new(two_class(), &TtaConfig::with_group_size(4)).unwrap();
        let batch = Array3::<f32>::zeros((3, 1, 2));

        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();
        assert_eq!(preds.dim(), (0, 2));
    }

    #[test]
    fn test_rank_zero_input_is_unsupported() {
        let model = echo_model(2, 0);
        let scalar = arr0(1.0f32).into_dyn();
        assert!(matches!(
            model.predict_batch(scalar.view()),
            Err(TtaError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_pre_softmax_averages_logits() {
        let config = TtaConfig {
            use_pre_softmax: true,
            ..TtaConfig::with_group_size(2)
        };
        let model = TtaModel::new(two_class(), &config).unwrap();
        assert_eq!(model.logit_width(), Some(2));

        let batch = Array3::from_shape_vec((2, 1, 2), vec![2.0f32, 0.0, 1.0, 0.0]).unwrap();
        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();
        assert_close(&preds, &array![[1.5f32, -1.5]]);
    }

    #[test]
    fn test_pre_softmax_needs_output_layer() {
        let config = TtaConfig {
            use_pre_softmax: true,
            ..TtaConfig::with_group_size(2)
        };
        assert!(matches!(
            TtaModel::new(EchoClassifier::default(), &config),
            Err(TtaError::PreSoftmaxUnavailable(_))
        ));
    }

    #[test]
    fn test_set_classifier_regenerates_logit_head() {
        let config = TtaConfig {
            use_pre_softmax: true,
            ..TtaConfig::with_group_size(2)
        };
        let mut model = TtaModel::new(two_class(), &config).unwrap();
        assert_eq!(model.logit_width(), Some(2));

        let five_class = LinearClassifier::from_weights(Array2::zeros((2, 5)), Array1::zeros(5))
            .unwrap()
            .with_name("five");
        model.set_classifier(five_class).unwrap();
        assert_eq!(model.logit_width(), Some(5));
        assert_eq!(model.classifier().name(), "five");

        let batch = Array3::<f32>::ones((2, 1, 2));
        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();
        assert_eq!(preds.dim(), (1, 5));
    }

    #[test]
    fn test_failed_rebind_keeps_previous_classifier() {
        let config = TtaConfig {
            use_pre_softmax: true,
            ..TtaConfig::with_group_size(2)
        };
        let mut model = TtaModel::new(two_class(), &config).unwrap();

        assert!(model.set_classifier(EchoClassifier::default()).is_err());
        assert_eq!(model.classifier().name(), "linear");
        assert_eq!(model.logit_width(), Some(2));
    }

    #[test]
    fn test_toggle_pre_softmax() {
        let mut model = TtaModel::new(two_class(), &TtaConfig::with_group_size(2)).unwrap();
        assert_eq!(model.logit_width(), None);

        model.set_use_pre_softmax(true).unwrap();
        assert!(model.use_pre_softmax());
        assert_eq!(model.logit_width(), Some(2));

        let mut echo = echo_model(2, 0);
        assert!(echo.set_use_pre_softmax(true).is_err());
        assert!(!echo.use_pre_softmax());
    }

    #[test]
    fn test_mutators_validate() {
        let mut model = echo_model(3, 1);

        assert!(matches!(
            model.set_exclude_outliers(3),
            Err(TtaError::OutlierRange {
                exclude: 3,
                group_size: 3
            })
        ));
        assert_eq!(model.exclude_outliers(), 1);

        assert!(matches!(model.set_group_size(0), Err(TtaError::InvalidGroupSize)));
        assert!(model.set_group_size(1).is_err());
        assert_eq!(model.group_size(), 3);
        model.set_group_size(5).unwrap();
        assert_eq!(model.group_size(), 5);

        assert!(matches!(
            model.set_mean_std(Some(vec![0.5]), None),
            Err(TtaError::IncompleteNormalization { present: "mean" })
        ));
        model
            .set_mean_std(Some(vec![127.5, 127.5, 127.5]), Some(vec![64.0, 64.0, 64.0]))
            .unwrap();
        assert_eq!(model.normalization().map(|s| s.channels()), Some(3));

        model.set_mean_std(None, None).unwrap();
        assert!(model.normalization().is_none());
        model.set_normalization(Some(NormalizationStats::scalar(0.5, 0.5).unwrap()));
        assert!(model.normalization().is_some());
    }

    #[test]
    fn test_directory_accuracy_and_loaded_dataset() {
        init_tracing();
        let dataset = motion_dataset();
        let mut model = echo_model(3, 0);

        let acc = model.predict_directory(dataset.path()).unwrap();
        assert!((acc - 1.0).abs() < 1e-12);

        let loaded = model.loaded_dataset().unwrap();
        assert_eq!(loaded.num_groups(), 2);
        assert_eq!(loaded.num_images(), 6);

        let classes = model.class_indices().unwrap();
        assert_eq!(classes.index_of("jump"), Some(0));
        assert_eq!(classes.index_of("walk"), Some(1));
    }

    #[test]
    fn test_exclusion_applies_in_every_mode() {
        let dataset = motion_dataset();
        let mut model = echo_model(3, 1);

        let batch = array![
            [0.8f32, 0.2],
            [0.7, 0.3],
            [0.9, 0.1],
            [0.6, 0.4],
            [0.6, 0.4],
            [0.01, 0.99],
        ];
        let preds = model.predict_batch(batch.view().into_dyn()).unwrap();
        assert_close(&preds, &array![[0.75f32, 0.25], [0.6, 0.4]]);

        let acc = model.predict_directory(dataset.path()).unwrap();
        assert!((acc - 0.5).abs() < 1e-12);

        model.set_exclude_outliers(0).unwrap();
        let acc = model.predict_on_loaded_files().unwrap();
        assert!((acc - 1.0).abs() < 1e-12);

        model.set_exclude_outliers(1).unwrap();
        let acc = model.predict_on_loaded_files().unwrap();
        assert!((acc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_evaluation_report() {
        let dataset = motion_dataset();
        let mut model = echo_model(3, 1);

        let report = model.evaluate_directory(dataset.path()).unwrap();
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        assert!((report.baseline_accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!(report.improvement() < 0.0);

        assert_eq!(report.metadata.classifier, "echo");
        assert_eq!(report.metadata.group_size, 3);
        assert_eq!(report.metadata.exclude_outliers, 1);
        assert_eq!(report.metadata.num_groups, 2);
        assert_eq!(report.metadata.num_images, 6);
        assert_eq!(report.metadata.num_classes, 2);

        assert_eq!(report.samples.len(), 2);
        let walk = &report.samples[1];
        assert_eq!(walk.label, "walk");
        assert_eq!(walk.predicted_label.as_deref(), Some("jump"));
        assert!(!walk.correct);
        assert_eq!(walk.copies_correct, 1);
        assert_eq!(walk.copies, 3);
        assert!((walk.confidence - 0.6).abs() < 1e-6);

        assert_eq!(report.per_class.len(), 2);
        assert!((report.per_class[0].accuracy - 1.0).abs() < 1e-12);
        assert_eq!(report.misclassified().count(), 1);
    }

    #[test]
    fn test_loaded_files_require_a_scan() {
        let model = echo_model(3, 0);
        assert!(matches!(
            model.predict_on_loaded_files(),
            Err(TtaError::NoLoadedDataset)
        ));
    }

    #[test]
    fn test_group_size_change_invalidates_loaded_groups() {
        let dataset = motion_dataset();
        let mut model = echo_model(3, 0);
        model.predict_directory(dataset.path()).unwrap();

        model.set_group_size(2).unwrap();
        assert!(matches!(
            model.predict_on_loaded_files(),
            Err(TtaError::GroupSizeMismatch {
                loaded: 3,
                current: 2
            })
        ));
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("a")).unwrap();

        let mut model = echo_model(2, 0);
        assert!(matches!(
            model.predict_directory(temp_dir.path()),
            Err(TtaError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_failed_scan_clears_loaded_dataset() {
        let dataset = motion_dataset();
        let mut model = echo_model(3, 0);
        model.predict_directory(dataset.path()).unwrap();
        assert!(model.loaded_dataset().is_some());

        let broken = TempDir::new().unwrap();
        std::fs::create_dir(broken.path().join("a")).unwrap();
        std::fs::write(broken.path().join("a").join("clip0.png"), "0.5 0.5").unwrap();

        assert!(matches!(
            model.predict_directory(broken.path()),
            Err(TtaError::FilenameParse { .. })
        ));
        assert!(model.loaded_dataset().is_none());
    }

    #[test]
    fn test_predict_dispatch() {
        let dataset = motion_dataset();
        let mut model = echo_model(3, 0);

        let output = model.predict(Array2::<f32>::ones((3, 2))).unwrap();
        assert_eq!(output.predictions().map(|p| p.dim()), Some((1, 2)));
        assert_eq!(output.accuracy(), None);

        let output = model.predict(dataset.path()).unwrap();
        assert_eq!(output.accuracy(), Some(1.0));
        assert!(output.into_predictions().is_none());
    }

    #[test]
    fn test_png_dataset_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        for (class, color) in [("green", Rgb([0u8, 255, 0])), ("red", Rgb([255u8, 0, 0]))] {
            let class_dir = temp_dir.path().join(class);
            std::fs::create_dir(&class_dir).unwrap();
            for i in 0..2 {
                RgbImage::from_pixel(2, 2, color)
                    .save(class_dir.join(format!("img[1.2]{}.png", i)))
                    .unwrap();
            }
        }

        let classifier = LinearClassifier::from_weights(
            array![[-5.0f32, 5.0], [5.0, -5.0], [0.0, 0.0]],
            array![0.0, 0.0],
        )
        .unwrap()
        .with_input_resolution(1);

        let mut model = TtaModel::new(classifier, &TtaConfig::with_group_size(2)).unwrap();
        let report = model.evaluate_directory(temp_dir.path()).unwrap();

        assert!((report.accuracy - 1.0).abs() < 1e-12);
        assert!((report.baseline_accuracy - 1.0).abs() < 1e-12);
        assert_eq!(report.samples[0].label, "green");
        assert_eq!(report.samples[0].predicted_label.as_deref(), Some("green"));
        assert_eq!(report.samples[1].predicted_label.as_deref(), Some("red"));
    }

    #[test]
    fn test_from_config_applies_sections() {
        let mut config = Config::default();
        config.tta.n = 3;
        config.scanner.extensions = vec!["TXT".to_string()];

        let dataset = TempDir::new().unwrap();
        let class_dir = dataset.path().join("a");
        std::fs::create_dir(&class_dir).unwrap();
        for i in 0..3 {
            std::fs::write(class_dir.join(format!("s[1]{}.txt", i)), "255 0").unwrap();
        }

        let mut model = TtaModel::from_config(EchoClassifier::default(), &config)
            .unwrap()
            .with_loader(TextLoader);
        assert_eq!(model.group_size(), 3);
        let acc = model.predict_directory(dataset.path()).unwrap();
        assert!((acc - 1.0).abs() < 1e-12);
    }
}

//! Test doubles shared by the unit tests.

use ndarray::{Array2, Array3, ArrayViewD};
use std::path::Path;

use crate::loader::ImageLoader;
use crate::model::{flatten_batch, Classifier};

/// Classifier whose prediction for an input is the input itself.
///
/// Lets tests dictate per-copy predictions exactly. It exposes no output
/// layer, so no pre-softmax head can be derived from it.
#[derive(Debug, Clone)]
pub struct EchoClassifier {
    pub name: String,
}

impl Default for EchoClassifier {
    fn default() -> Self {
        Self {
            name: "echo".to_string(),
        }
    }
}

impl Classifier for EchoClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, batch: ArrayViewD<'_, f32>, _batch_size: usize) -> anyhow::Result<Array2<f32>> {
        flatten_batch(batch)
    }

    fn input_resolution(&self) -> u32 {
        1
    }
}

/// Loader reading whitespace-separated numbers from text files as one pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

impl ImageLoader for TextLoader {
    fn load(&self, path: &Path, _target_size: u32) -> anyhow::Result<Array3<f32>> {
        let content = std::fs::read_to_string(path)?;
        let values = content
            .split_whitespace()
            .map(str::parse::<f32>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Array3::from_shape_vec((1, 1, values.len()), values)?)
    }
}

/// Write one text "image" per row, named `{base}{index}.png`.
pub fn write_group(dir: &Path, base: &str, rows: &[&[f32]]) {
    std::fs::create_dir_all(dir).unwrap();
    for (i, row) in rows.iter().enumerate() {
        let content: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        std::fs::write(dir.join(format!("{}{}.png", base, i)), content.join(" ")).unwrap();
    }
}

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

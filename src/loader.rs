//! Image loading and input normalization.
//!
//! Images are decoded to `(height, width, channels)` arrays of raw 0–255
//! values, resized to the classifier's square input, then normalized either
//! with dataset statistics or by dividing by 255.

use anyhow::Context;
use image::imageops::FilterType;
use ndarray::{Array1, Array3};
use std::path::Path;

use crate::config::NormalizationStats;
use crate::error::{Result, TtaError};

/// Decodes image files into pixel arrays.
pub trait ImageLoader {
    /// Load `path` as a `(target_size, target_size, channels)` array of raw values.
    fn load(&self, path: &Path, target_size: u32) -> anyhow::Result<Array3<f32>>;
}

/// RGB loader backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct RgbImageLoader {
    filter: FilterType,
}

impl Default for RgbImageLoader {
    fn default() -> Self {
        Self {
            filter: FilterType::Nearest,
        }
    }
}

impl RgbImageLoader {
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl ImageLoader for RgbImageLoader {
    fn load(&self, path: &Path, target_size: u32) -> anyhow::Result<Array3<f32>> {
        let img = image::open(path)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?
            .to_rgb8();

        let img = if img.dimensions() == (target_size, target_size) {
            img
        } else {
            image::imageops::resize(&img, target_size, target_size, self.filter)
        };

        let (width, height) = img.dimensions();
        let pixels: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();

        Ok(Array3::from_shape_vec(
            (height as usize, width as usize, 3),
            pixels,
        )?)
    }
}

/// Normalize a channels-last image.
///
/// With statistics: `(x - mean) / std`, broadcast over the last axis.
/// Without: `x / 255`.
pub fn normalize(image: Array3<f32>, stats: Option<&NormalizationStats>) -> Result<Array3<f32>> {
    let Some(stats) = stats else {
        return Ok(image / 255.0);
    };

    let channels = image.shape()[2];
    if stats.channels() != 1 && stats.channels() != channels {
        return Err(TtaError::ShapeMismatch(format!(
            "normalization has {} channels, image has {}",
            stats.channels(),
            channels
        )));
    }

    let mean = Array1::from(stats.mean.clone());
    let std = Array1::from(stats.std.clone());
    Ok((image - &mean) / &std)
}

/// Load one image with `loader` and normalize it.
pub fn load_and_normalize(
    loader: &dyn ImageLoader,
    path: &Path,
    target_size: u32,
    stats: Option<&NormalizationStats>,
) -> Result<Array3<f32>> {
    let image = loader
        .load(path, target_size)
        .map_err(|source| TtaError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
    normalize(image, stats)
}

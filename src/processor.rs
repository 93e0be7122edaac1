//! This module provides tools for preprocessing images before they are fed into a model.
//!
//! It defines the `ImageProcessor` trait for generic image processing operations
//! and provides a concrete implementation, `ImagePreprocessor`, which handles
//! resizing, RGB conversion, normalization, and the HWC tensor layout.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array, Axis, Ix4};
use rayon::prelude::*;

use crate::{
    config::{PreprocessConfig, IMAGENET_MEAN, IMAGENET_STD},
    error::{ClassifierError, Result},
};

/// A batch of images laid out as `[batch, height, width, channels]`.
pub type Tensor = Array<f32, Ix4>;

/// A trait for processing images into tensors suitable for model input.
pub trait ImageProcessor {
    /// Processes a single image into a 4D tensor with a batch size of one.
    fn process(&self, image: &DynamicImage) -> Result<Tensor>;

    /// Processes a batch of images into a single 4D tensor.
    fn process_batch(&self, images: Vec<&DynamicImage>) -> Result<Tensor>
    where
        Self: Sync,
    {
        if images.is_empty() {
            return Err(ClassifierError::Preprocess("no images provided".to_string()));
        }
        let tensors: Result<Vec<_>> =
            images.into_par_iter().map(|img| self.process(img)).collect();
        let tensors = tensors?;

        ndarray::concatenate(
            Axis(0),
            &tensors.iter().map(|t| t.view()).collect::<Vec<_>>(),
        )
        .map_err(|e| ClassifierError::Preprocess(format!("failed to concatenate tensors: {}", e)))
    }
}

/// A preprocessor that resizes and normalizes images into HWC tensors.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    pub width: u32,
    pub height: u32,
    pub normalize: bool,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ImagePreprocessor {
    /// Creates a new `ImagePreprocessor`.
    pub fn new(width: u32, height: u32, normalize: bool, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            width,
            height,
            normalize,
            mean,
            std,
        }
    }

    /// Creates a preprocessor from the `preprocess` section of the configuration.
    pub fn from_config(config: &PreprocessConfig) -> Result<Self> {
        let mean = channel_triplet(&config.mean, "mean")?;
        let std = channel_triplet(&config.std, "std")?;
        Ok(Self::new(config.width, config.height, config.normalize, mean, std))
    }

    /// Returns a copy targeting different input dimensions.
    pub fn with_size(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self.clone()
        }
    }

    /// The input shape this preprocessor produces, `[1, height, width, 3]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    /// Normalizes the pixel values and arranges them in HWC order.
    fn normalize_and_to_tensor(&self, image: &RgbImage) -> Tensor {
        let mut tensor = Array::zeros((self.height as usize, self.width as usize, 3));

        for (x, y, pixel) in image.enumerate_pixels() {
            for (c, &value) in pixel.0.iter().enumerate() {
                let mut v = value as f32 / 255.0;
                if self.normalize {
                    v = (v - self.mean[c]) / self.std[c];
                }
                tensor[[y as usize, x as usize, c]] = v;
            }
        }

        tensor.insert_axis(Axis(0))
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(224, 224, true, IMAGENET_MEAN, IMAGENET_STD)
    }
}

impl ImageProcessor for ImagePreprocessor {
    /// Resizes the image to the target size with a Lanczos filter, drops alpha,
    /// and produces a normalized tensor.
    fn process(&self, image: &DynamicImage) -> Result<Tensor> {
        if self.width == 0 || self.height == 0 {
            return Err(ClassifierError::Preprocess(format!(
                "invalid target size {}x{}",
                self.width, self.height
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::Preprocess("image has no pixels".to_string()));
        }
        let resized = image.resize_exact(self.width, self.height, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();
        Ok(self.normalize_and_to_tensor(&rgb))
    }
}

/// Flattens a single-image tensor into its row-major HWC buffer.
pub fn flatten(tensor: &Tensor) -> Vec<f32> {
    tensor.iter().copied().collect()
}

fn channel_triplet(values: &[f32], name: &str) -> Result<[f32; 3]> {
    values.try_into().map_err(|_| {
        ClassifierError::Preprocess(format!(
            "{} needs 3 channel values, got {}",
            name,
            values.len()
        ))
    })
}

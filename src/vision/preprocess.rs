//! Tensor preparation for the PaddleOCR models
//!
//! Resizing and normalisation of RGB images into NCHW `f32` tensors.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

/// Tensor preparation settings
#[derive(Debug, Clone)]
pub struct TensorConfig {
    /// Longest side fed to the detection model
    pub det_max_side: u32,
    /// Input height of the recognition model
    pub rec_height: u32,
    /// Widest recognition input
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for TensorConfig {
    fn default() -> Self {
        Self {
            det_max_side: 960,
            rec_height: 48,
            rec_max_width: 640,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] to [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Detection input plus the factors mapping model pixels back to the image
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Normalise an RGB image into a (1, 3, H, W) tensor
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

/// Shrink so the longest side fits `det_max_side`, then snap both sides to
/// multiples of 32 as DBNet requires
pub fn prepare_detection(image: &RgbImage, config: &TensorConfig) -> DetectionInput {
    let (width, height) = image.dimensions();
    let longest = width.max(height).max(1) as f32;
    let ratio = (config.det_max_side as f32 / longest).min(1.0);

    let snap = |side: u32| -> u32 {
        let scaled = (side as f32 * ratio / 32.0).round() as u32 * 32;
        scaled.max(32)
    };
    let new_width = snap(width);
    let new_height = snap(height);

    let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

    DetectionInput {
        tensor: to_nchw(&resized, &config.mean, &config.std),
        scale_x: width as f32 / new_width as f32,
        scale_y: height as f32 / new_height as f32,
    }
}

/// Resize a text crop to the recognition height, keeping its aspect ratio
pub fn prepare_recognition(crop: &RgbImage, config: &TensorConfig) -> Array4<f32> {
    let (width, height) = crop.dimensions();
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let new_width = ((config.rec_height as f32 * aspect).ceil() as u32).clamp(8, config.rec_max_width);

    let resized = image::imageops::resize(crop, new_width, config.rec_height, FilterType::Triangle);
    to_nchw(&resized, &config.mean, &config.std)
}

//! Image preprocessing filters for OCR
//!
//! Cropping, thresholding and contrast enhancement applied to document
//! zones before they are handed to an OCR engine. All functions are pure.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BoundingBox;

/// Regions smaller than this (in either dimension) are upscaled before OCR
pub const MIN_OCR_DIMENSION: u32 = 80;

/// Named preprocessing chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessProfile {
    /// Untouched colour pixels
    Raw,
    /// Grayscale, intensity x1.5, Otsu binarisation
    CinNewZone,
    /// Grayscale, intensity x1.3, Otsu binarisation
    CinOldZone,
    /// x3 upscale, grayscale, local histogram equalisation, Otsu
    CinOldEnhanced,
    /// Grayscale, fixed cutoff at 148
    VehiclePage,
    /// Upscale by the given factor, then grayscale
    Upscaled(u32),
}

impl PreprocessProfile {
    /// Upscale factor this profile applies by itself
    pub fn scale(&self) -> u32 {
        match self {
            PreprocessProfile::CinOldEnhanced => 3,
            PreprocessProfile::Upscaled(factor) => (*factor).max(1),
            _ => 1,
        }
    }
}

/// Result of preprocessing that includes the applied upscale
pub struct PreprocessResult {
    /// Processed image
    pub image: DynamicImage,
    /// Total upscale factor relative to the input
    pub scale: u32,
}

/// Apply a profile to an image
pub fn apply_profile(image: &DynamicImage, profile: PreprocessProfile) -> PreprocessResult {
    let scale = profile.scale();
    let processed = match profile {
        PreprocessProfile::Raw => image.clone(),
        PreprocessProfile::CinNewZone => {
            let gray = scale_intensity(&to_grayscale(image), 1.5);
            DynamicImage::ImageLuma8(threshold_otsu(&gray))
        }
        PreprocessProfile::CinOldZone => {
            let gray = scale_intensity(&to_grayscale(image), 1.3);
            DynamicImage::ImageLuma8(threshold_otsu(&gray))
        }
        PreprocessProfile::CinOldEnhanced => {
            let gray = to_grayscale(&upscale(image, scale));
            let equalized = equalize_local(&gray, 1.5, 8);
            DynamicImage::ImageLuma8(threshold_otsu(&equalized))
        }
        PreprocessProfile::VehiclePage => {
            DynamicImage::ImageLuma8(threshold_fixed(&to_grayscale(image), 148))
        }
        PreprocessProfile::Upscaled(_) => {
            DynamicImage::ImageLuma8(to_grayscale(&upscale(image, scale)))
        }
    };

    debug!(
        "Applied {:?}: {}x{} -> {}x{}",
        profile,
        image.width(),
        image.height(),
        processed.width(),
        processed.height()
    );

    PreprocessResult {
        image: processed,
        scale,
    }
}

/// Upscale factor (2x-4x) for regions too small for reliable OCR
pub fn auto_upscale_factor(width: u32, height: u32) -> u32 {
    if width == 0 || height == 0 {
        return 1;
    }
    if height < MIN_OCR_DIMENSION || width < MIN_OCR_DIMENSION {
        let height_scale = (MIN_OCR_DIMENSION as f32 / height as f32).ceil() as u32;
        let width_scale = (MIN_OCR_DIMENSION as f32 / width as f32).ceil() as u32;
        height_scale.max(width_scale).clamp(2, 4)
    } else {
        1
    }
}

/// True when the luminance spread is too small to hold any text
pub fn is_near_blank(image: &DynamicImage) -> bool {
    let gray = to_grayscale(image);
    let mut pixels = gray.pixels().map(|p| p[0]);
    let Some(first) = pixels.next() else {
        return true;
    };
    let (min, max) = pixels.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    max - min < 8
}

/// Outcome of a clamped crop
#[derive(Debug, Clone)]
pub enum Crop {
    /// The requested box does not overlap the image
    Empty,
    /// Cropped pixels and their position in the source image
    Region {
        image: DynamicImage,
        origin: BoundingBox,
    },
}

impl Crop {
    pub fn is_empty(&self) -> bool {
        matches!(self, Crop::Empty)
    }
}

/// Convert a fractional (x, y, w, h) box to pixels, clamped to the image
pub fn fraction_to_pixels(bounds: (f32, f32, f32, f32), width: u32, height: u32) -> BoundingBox {
    let (fx, fy, fw, fh) = bounds;
    let w = width as f32;
    let h = height as f32;

    let left = (fx * w).round().clamp(0.0, w);
    let top = (fy * h).round().clamp(0.0, h);
    let right = ((fx + fw) * w).round().clamp(0.0, w);
    let bottom = ((fy + fh) * h).round().clamp(0.0, h);

    BoundingBox {
        x: left as u32,
        y: top as u32,
        width: (right - left).max(0.0) as u32,
        height: (bottom - top).max(0.0) as u32,
    }
}

/// Crop a pixel box, clamping it to the image bounds
pub fn crop_pixels(image: &DynamicImage, bounds: BoundingBox) -> Crop {
    let x = bounds.x.min(image.width());
    let y = bounds.y.min(image.height());
    let right = bounds.right().min(image.width());
    let bottom = bounds.bottom().min(image.height());

    if right <= x || bottom <= y {
        return Crop::Empty;
    }

    let origin = BoundingBox {
        x,
        y,
        width: right - x,
        height: bottom - y,
    };
    Crop::Region {
        image: image.crop_imm(origin.x, origin.y, origin.width, origin.height),
        origin,
    }
}

/// Crop a fractional box; never fails, an out-of-range box yields [`Crop::Empty`]
pub fn safe_crop(image: &DynamicImage, bounds: (f32, f32, f32, f32)) -> Crop {
    crop_pixels(image, fraction_to_pixels(bounds, image.width(), image.height()))
}

/// Convert to grayscale with the standard luminance weights
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        Luma([gray.round().clamp(0.0, 255.0) as u8])
    })
}

/// Multiply intensities by `factor`, saturating at 255
pub fn scale_intensity(gray: &GrayImage, factor: f32) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = (pixel[0] as f32 * factor).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Binarise with an automatically chosen (Otsu) level
pub fn threshold_otsu(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    threshold(gray, level, ThresholdType::Binary)
}

/// Binarise with a fixed cutoff: above `level` becomes white
pub fn threshold_fixed(gray: &GrayImage, level: u8) -> GrayImage {
    threshold(gray, level, ThresholdType::Binary)
}

/// Upscale by an integer factor with a cubic filter
pub fn upscale(image: &DynamicImage, factor: u32) -> DynamicImage {
    if factor <= 1 {
        return image.clone();
    }
    image.resize_exact(
        image.width() * factor,
        image.height() * factor,
        FilterType::CatmullRom,
    )
}

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into `tiles` x `tiles` cells; each cell gets a
/// clipped histogram mapping, and pixels blend the mappings of the four
/// nearest cell centres.
pub fn equalize_local(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            let mut area = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                    area += 1;
                }
            }
            if area == 0 {
                for (i, v) in lut.iter_mut().enumerate() {
                    *v = i as u8;
                }
                continue;
            }

            let limit = ((clip_limit * area as f32 / 256.0).max(1.0)) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            let residual = excess % 256;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += bonus;
                if (i as u32) < residual {
                    *bin += 1;
                }
            }

            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[i] = (cdf as f32 * 255.0 / area as f32).round().min(255.0) as u8;
            }
        }
    }

    let neighbours = |pos: u32, tile: u32, count: u32| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let lo = f.floor().clamp(0.0, (count - 1) as f32);
        let hi = (lo + 1.0).min((count - 1) as f32);
        let weight = (f - lo).clamp(0.0, 1.0);
        (lo as usize, hi as usize, weight)
    };

    GrayImage::from_fn(width, height, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x as usize + tx][v] as f32;

        let top = at(tx0, ty0) * (1.0 - ax) + at(tx1, ty0) * ax;
        let bottom = at(tx0, ty1) * (1.0 - ax) + at(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
    }

    #[test]
    fn test_grayscale_weights() {
        let red = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([255, 0, 0])));
        // 0.299 * 255 = 76.245
        assert_eq!(to_grayscale(&red).get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn test_scale_intensity_saturates() {
        let gray = GrayImage::from_raw(3, 1, vec![10, 100, 200]).unwrap();
        let scaled = scale_intensity(&gray, 1.5);
        assert_eq!(scaled.as_raw(), &vec![15, 150, 255]);
    }

    #[test]
    fn test_fixed_threshold() {
        let gray = GrayImage::from_raw(3, 1, vec![100, 148, 200]).unwrap();
        let binary = threshold_fixed(&gray, 148);
        assert_eq!(binary.as_raw(), &vec![0, 0, 255]);
    }

    #[test]
    fn test_otsu_keeps_two_levels() {
        let gray = GrayImage::from_fn(10, 1, |x, _| Luma([if x < 5 { 20 } else { 230 }]));
        let binary = threshold_otsu(&gray);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(9, 0)[0], 255);
    }

    #[test]
    fn test_crop_clamps_to_image() {
        let image = solid(100, 50, 255);
        let Crop::Region { image: cropped, origin } = safe_crop(&image, (0.8, 0.5, 0.5, 0.9)) else {
            panic!("expected a region");
        };
        assert_eq!(origin, BoundingBox { x: 80, y: 25, width: 20, height: 25 });
        assert_eq!(cropped.width(), 20);
        assert_eq!(cropped.height(), 25);
    }

    #[test]
    fn test_crop_outside_is_empty() {
        let image = solid(100, 50, 255);
        assert!(safe_crop(&image, (1.2, 0.1, 0.3, 0.3)).is_empty());
        assert!(safe_crop(&image, (0.1, 0.1, 0.0, 0.3)).is_empty());
        assert!(crop_pixels(&image, BoundingBox { x: 500, y: 0, width: 10, height: 10 }).is_empty());
    }

    #[test]
    fn test_crop_tiny_image() {
        let image = solid(1, 1, 0);
        // Any zone on a one-pixel image either maps to that pixel or to nothing
        for bounds in [(0.0, 0.0, 1.0, 1.0), (0.6, 0.25, 0.39, 0.09), (0.9, 0.9, 0.5, 0.5)] {
            match safe_crop(&image, bounds) {
                Crop::Empty => {}
                Crop::Region { origin, .. } => {
                    assert!(origin.right() <= 1 && origin.bottom() <= 1);
                }
            }
        }
    }

    #[test]
    fn test_near_blank() {
        assert!(is_near_blank(&solid(20, 20, 250)));
        let mut striped = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        striped.put_pixel(5, 5, Rgb([0, 0, 0]));
        assert!(!is_near_blank(&DynamicImage::ImageRgb8(striped)));
    }

    #[test]
    fn test_auto_upscale_factor() {
        assert_eq!(auto_upscale_factor(300, 120), 1);
        assert_eq!(auto_upscale_factor(300, 60), 2);
        assert_eq!(auto_upscale_factor(300, 10), 4);
        assert_eq!(auto_upscale_factor(0, 10), 1);
    }

    #[test]
    fn test_profiles_report_scale() {
        let image = solid(10, 8, 128);
        let enhanced = apply_profile(&image, PreprocessProfile::CinOldEnhanced);
        assert_eq!(enhanced.scale, 3);
        assert_eq!(enhanced.image.width(), 30);
        assert_eq!(enhanced.image.height(), 24);

        let raw = apply_profile(&image, PreprocessProfile::Raw);
        assert_eq!(raw.scale, 1);
        assert_eq!(raw.image.width(), 10);
    }

    #[test]
    fn test_equalize_local_spreads_range() {
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 16) as u8]));
        let equalized = equalize_local(&gray, 1.5, 8);
        let min = equalized.pixels().map(|p| p[0]).min().unwrap();
        let max = equalized.pixels().map(|p| p[0]).max().unwrap();
        assert!(max - min > 15, "range {}..{} was not widened", min, max);
    }

    #[test]
    fn test_equalize_local_tiny_image() {
        let gray = GrayImage::from_pixel(3, 2, Luma([50]));
        let equalized = equalize_local(&gray, 1.5, 8);
        assert_eq!(equalized.dimensions(), (3, 2));
    }
}

//! Image preprocessing filters applied to region crops before text detection
//!
//! Only contrast enhancement is offered. There is deliberately no
//! binarization mode: thresholding throws away the gradient information text
//! detectors rely on around glyph edges.

use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Contrast-enhancement strategy for region crops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    /// Pass crops through untouched
    #[default]
    None,
    /// Luminance only, kept in RGBA layout
    Grayscale,
    /// Linearly stretch the luminance range of the crop to 0..=255
    ContrastStretch,
    /// Histogram equalization of the luminance channel
    HistogramEqualize,
}

/// Apply the configured preprocessing to a region crop.
/// The output always has the same dimensions as the input.
pub fn apply_preprocessing(image: RgbaImage, mode: PreprocessMode) -> RgbaImage {
    trace!("Preprocessing {}x{} crop with {:?}", image.width(), image.height(), mode);

    match mode {
        PreprocessMode::None => image,
        PreprocessMode::Grayscale => {
            let mut image = image;
            apply_grayscale(&mut image);
            image
        }
        PreprocessMode::ContrastStretch => {
            let mut image = image;
            apply_contrast_stretch(&mut image);
            image
        }
        PreprocessMode::HistogramEqualize => {
            let gray = DynamicImage::ImageRgba8(image).to_luma8();
            let equalized = imageproc::contrast::equalize_histogram(&gray);
            DynamicImage::ImageLuma8(equalized).to_rgba8()
        }
    }
}

fn luminance(pixel: &[u8]) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Convert RGBA to grayscale (keeping RGBA format for compatibility)
fn apply_grayscale(image: &mut RgbaImage) {
    for chunk in image.chunks_exact_mut(4) {
        let gray = luminance(chunk) as u8;
        chunk[0] = gray;
        chunk[1] = gray;
        chunk[2] = gray;
        // Alpha unchanged
    }
}

/// Map the darkest luminance to 0 and the brightest to 255 on every channel
fn apply_contrast_stretch(image: &mut RgbaImage) {
    let (lo, hi) = image
        .chunks_exact(4)
        .map(luminance)
        .fold((f32::MAX, f32::MIN), |(lo, hi), l| (lo.min(l), hi.max(l)));

    // Flat or empty crop
    if hi - lo < 1.0 {
        return;
    }

    let scale = 255.0 / (hi - lo);
    for chunk in image.chunks_exact_mut(4) {
        for value in chunk.iter_mut().take(3) {
            *value = ((*value as f32 - lo) * scale).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn image_from(pixels: &[[u8; 4]], width: u32, height: u32) -> RgbaImage {
        let data: Vec<u8> = pixels.iter().flatten().copied().collect();
        RgbaImage::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn test_preprocessing_none() {
        let image = image_from(&[[100, 150, 200, 255]], 1, 1);
        let result = apply_preprocessing(image.clone(), PreprocessMode::None);
        assert_eq!(result, image);
    }

    #[test]
    fn test_grayscale() {
        let image = image_from(&[[255, 0, 0, 255]], 1, 1); // Red pixel
        let result = apply_preprocessing(image, PreprocessMode::Grayscale);
        // Gray = 0.299*255 = 76.245 -> 76
        assert_eq!(result.get_pixel(0, 0), &Rgba([76, 76, 76, 255]));
    }

    #[test]
    fn test_contrast_stretch_expands_range() {
        let image = image_from(
            &[[100, 100, 100, 255], [150, 150, 150, 255], [120, 120, 120, 128]],
            3,
            1,
        );
        let result = apply_preprocessing(image, PreprocessMode::ContrastStretch);
        assert_eq!(result.get_pixel(0, 0)[0], 0);
        assert_eq!(result.get_pixel(1, 0)[0], 255);
        assert_eq!(result.get_pixel(2, 0)[3], 128); // Alpha unchanged
    }

    #[test]
    fn test_contrast_stretch_flat_image_unchanged() {
        let image = image_from(&[[90, 90, 90, 255], [90, 90, 90, 255]], 2, 1);
        let result = apply_preprocessing(image.clone(), PreprocessMode::ContrastStretch);
        assert_eq!(result, image);
    }

    #[test]
    fn test_modes_preserve_dimensions() {
        let image = RgbaImage::from_fn(37, 11, |x, y| Rgba([(x * 6) as u8, (y * 20) as u8, 40, 255]));
        for mode in [
            PreprocessMode::None,
            PreprocessMode::Grayscale,
            PreprocessMode::ContrastStretch,
            PreprocessMode::HistogramEqualize,
        ] {
            let result = apply_preprocessing(image.clone(), mode);
            assert_eq!(result.dimensions(), (37, 11), "{:?}", mode);
        }
    }
}

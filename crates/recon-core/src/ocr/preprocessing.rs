//! Image preprocessing for OCR.

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::error::OcrError;

/// Grayscale conversion plus upscaling of narrow scans.
pub struct ImagePreprocessor {
    /// Images narrower than this are upscaled to it.
    min_width: u32,
    /// Upper bound on output pixels.
    max_pixels: u64,
}

impl ImagePreprocessor {
    /// Create a new preprocessor with default settings.
    pub fn new() -> Self {
        Self {
            min_width: 1000,
            max_pixels: 40_000_000,
        }
    }

    pub fn with_min_width(mut self, min_width: u32) -> Self {
        self.min_width = min_width;
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Convert to grayscale and upscale to the minimum width with Lanczos.
    pub fn prepare(&self, image: &DynamicImage) -> Result<DynamicImage, OcrError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::Preprocessing(format!("degenerate image {}x{}", width, height)));
        }

        let gray = DynamicImage::ImageLuma8(image.to_luma8());

        let (new_width, new_height) = self.target_dimensions(width, height);
        if u64::from(new_width) * u64::from(new_height) > self.max_pixels {
            return Err(OcrError::Preprocessing(format!(
                "image {}x{} exceeds {} pixels",
                new_width, new_height, self.max_pixels
            )));
        }

        if (new_width, new_height) == (width, height) {
            return Ok(gray);
        }

        debug!("Upscaling {}x{} to {}x{}", width, height, new_width, new_height);
        Ok(gray.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3))
    }

    fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if width >= self.min_width {
            return (width, height);
        }
        let scale = self.min_width as f64 / width as f64;
        let new_height = (height as f64 * scale).round().max(1.0) as u32;
        (self.min_width, new_height)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_target_dimensions() {
        let preprocessor = ImagePreprocessor::new();
        assert_eq!(preprocessor.target_dimensions(500, 700), (1000, 1400));
        assert_eq!(preprocessor.target_dimensions(1200, 1600), (1200, 1600));
        assert_eq!(preprocessor.target_dimensions(3, 1), (1000, 333));
    }

    #[test]
    fn test_prepare_grayscale_and_upscale() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, image::Rgb([200, 10, 10])));
        let prepared = ImagePreprocessor::new().with_min_width(400).prepare(&image).unwrap();

        assert_eq!(prepared.dimensions(), (400, 200));
        assert!(matches!(prepared, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn test_wide_image_keeps_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(1500, 10));
        let prepared = ImagePreprocessor::new().prepare(&image).unwrap();
        assert_eq!(prepared.dimensions(), (1500, 10));
    }

    #[test]
    fn test_pixel_limit() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 1000));
        let result = ImagePreprocessor::new().with_max_pixels(1_000_000).prepare(&image);
        assert!(matches!(result, Err(OcrError::Preprocessing(_))));
    }

    #[test]
    fn test_empty_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(ImagePreprocessor::new().prepare(&image).is_err());
    }
}

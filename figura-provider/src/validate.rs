//! Validation and normalization of generated images.

use figura_core::error::FiguraError;
use image::imageops::FilterType;
use image::{ImageDecoder, ImageFormat};
use std::io::Cursor;

/// Checks that a payload is a plausible image and re-encodes it as PNG no
/// larger than the target resolution.
#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_dimension: u32,
    target_dimension: u32,
}

impl ImageValidator {
    pub fn new() -> Self {
        Self {
            max_dimension: 8192,
            target_dimension: 1024,
        }
    }

    /// Images wider or taller than this are rejected outright
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Images larger than this are downsized, keeping the aspect ratio
    pub fn with_target_dimension(mut self, target_dimension: u32) -> Self {
        self.target_dimension = target_dimension;
        self
    }

    /// Validate `bytes` and return them as PNG
    pub fn normalize(&self, bytes: &[u8]) -> Result<Vec<u8>, FiguraError> {
        if bytes.is_empty() {
            return Err(FiguraError::validation("image payload is empty"));
        }

        let format = image::guess_format(bytes)
            .map_err(|_| FiguraError::validation("image payload has no recognizable format"))?;
        let (width, height) = dimensions_for_format(bytes, format)
            .ok_or_else(|| FiguraError::validation(format!("malformed {:?} header", format)))?;

        if width == 0 || height == 0 {
            return Err(FiguraError::validation(format!(
                "image has degenerate dimensions {}x{}",
                width, height
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(FiguraError::validation(format!(
                "image dimensions {}x{} exceed maximum dimension {}",
                width, height, self.max_dimension
            )));
        }

        let mut decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| FiguraError::validation(format!("failed to decode image: {}", e)))?;
        if width.max(height) > self.target_dimension {
            tracing::debug!(
                "downsizing generated image from {}x{} to fit {}px",
                width,
                height,
                self.target_dimension
            );
            decoded = decoded.resize(
                self.target_dimension,
                self.target_dimension,
                FilterType::Lanczos3,
            );
        }

        let mut png = Vec::new();
        decoded
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| FiguraError::validation(format!("failed to encode PNG: {}", e)))?;
        Ok(png)
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Read dimensions from the header without decoding pixels
fn dimensions_for_format(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Png => image::codecs::png::PngDecoder::new(Cursor::new(bytes))
            .ok()
            .map(|d| d.dimensions()),
        ImageFormat::Jpeg => image::codecs::jpeg::JpegDecoder::new(Cursor::new(bytes))
            .ok()
            .map(|d| d.dimensions()),
        ImageFormat::Gif => image::codecs::gif::GifDecoder::new(Cursor::new(bytes))
            .ok()
            .map(|d| d.dimensions()),
        ImageFormat::WebP => image::codecs::webp::WebPDecoder::new(Cursor::new(bytes))
            .ok()
            .map(|d| d.dimensions()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn encode_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 40, 40]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_dimensions(png: &[u8]) -> (u32, u32) {
        dimensions_for_format(png, ImageFormat::Png).unwrap()
    }

    #[test]
    fn test_small_jpeg_is_reencoded() {
        let jpeg = encode_test_image(64, 48, ImageFormat::Jpeg);
        let png = ImageValidator::new().normalize(&jpeg).unwrap();

        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
        assert_eq!(png_dimensions(&png), (64, 48));
    }

    #[test]
    fn test_large_image_is_downsized() {
        let big = encode_test_image(2048, 1024, ImageFormat::Png);
        let png = ImageValidator::new().normalize(&big).unwrap();

        assert_eq!(png_dimensions(&png), (1024, 512));
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let huge = encode_test_image(300, 20, ImageFormat::Png);
        let err = ImageValidator::new()
            .with_max_dimension(256)
            .normalize(&huge)
            .unwrap_err();

        assert!(matches!(err, FiguraError::Validation(_)));
        assert!(err.to_string().contains("exceed maximum dimension 256"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let validator = ImageValidator::new();
        assert!(matches!(
            validator.normalize(b""),
            Err(FiguraError::Validation(_))
        ));
        assert!(matches!(
            validator.normalize(b"<html>rate limited</html>"),
            Err(FiguraError::Validation(_))
        ));

        // Valid signature, truncated body
        let mut truncated = encode_test_image(32, 32, ImageFormat::Png);
        truncated.truncate(40);
        assert!(matches!(
            validator.normalize(&truncated),
            Err(FiguraError::Validation(_))
        ));
    }
}

//! Preparing the source image for upload.
//!
//! The workflow only needs enough resolution to find objects, so the
//! image is shrunk to a maximum width and sent as base64 JPEG. Polygon
//! points in the response refer to this sent size, which is recorded
//! as the mask frame.

use autolayout_pipeline::Dimensions;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;

use crate::RoboflowError;

/// A base64 JPEG and the dimensions it was encoded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadImage {
    /// Base64 (standard alphabet, padded) JPEG bytes.
    pub base64: String,
    /// Size of the encoded image.
    pub frame: Dimensions,
}

/// Size of the uploaded image: never wider than `max_width`, aspect
/// preserved, never upscaled.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sent_dimensions(original: Dimensions, max_width: u32) -> Dimensions {
    if original.width <= max_width || original.width == 0 {
        return original;
    }
    let ratio = f64::from(max_width) / f64::from(original.width);
    let height = (f64::from(original.height) * ratio).round() as u32;
    Dimensions::new(max_width, height.max(1))
}

/// Decode `bytes`, shrink to `max_width`, and encode as base64 JPEG.
///
/// # Errors
///
/// Returns [`RoboflowError::Image`] if decoding or encoding fails.
pub fn prepare_upload(bytes: &[u8], max_width: u32, quality: u8) -> Result<UploadImage, RoboflowError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let original = Dimensions::new(rgb.width(), rgb.height());
    let frame = sent_dimensions(original, max_width);

    let rgb = if frame == original {
        rgb
    } else {
        image::imageops::resize(&rgb, frame.width, frame.height, FilterType::Triangle)
    };

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    image::ImageEncoder::write_image(
        encoder,
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    tracing::debug!(
        width = frame.width,
        height = frame.height,
        jpeg_bytes = jpeg.len(),
        "upload image prepared",
    );

    Ok(UploadImage {
        base64: STANDARD.encode(&jpeg),
        frame,
    })
}

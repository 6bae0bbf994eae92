//! Working-resolution scale factor and coordinate mapping.
//!
//! Morphology cost grows with pixel count, so masks are processed on a
//! grid whose longest axis is at most `max_processing_size`. A single
//! factor is computed once per source image and used for every mask;
//! bounding boxes found on the working grid are mapped back to
//! original-image space with [`Scale::to_original`].

use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, Dimensions, PipelineError};

/// Compute the downscale factor for an image.
///
/// Returns `1.0` when `max(width, height) <= max_dim`, otherwise
/// `max_dim / max(width, height)`. The result is always in `(0, 1]`
/// for non-zero inputs.
#[must_use]
pub fn compute_scale(width: u32, height: u32, max_dim: u32) -> f64 {
    let long_axis = width.max(height);
    if long_axis <= max_dim {
        1.0
    } else {
        f64::from(max_dim) / f64::from(long_axis)
    }
}

/// Scale factor plus the original and working dimensions it relates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    factor: f64,
    original: Dimensions,
    working: Dimensions,
}

impl Scale {
    /// Compute the scale for an original image.
    ///
    /// Working dimensions are `round(original * factor)`, clamped to at
    /// least one pixel so very thin images still get a grid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDimensions`] if either original
    /// dimension is zero, and [`PipelineError::InvalidConfig`] if
    /// `max_dim` is zero.
    pub fn new(original: Dimensions, max_dim: u32) -> Result<Self, PipelineError> {
        if original.width == 0 || original.height == 0 {
            return Err(PipelineError::InvalidDimensions {
                width: original.width,
                height: original.height,
            });
        }
        if max_dim == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_processing_size must be at least 1".to_owned(),
            ));
        }

        let factor = compute_scale(original.width, original.height, max_dim);
        let working = Dimensions::new(
            scale_dimension(original.width, factor),
            scale_dimension(original.height, factor),
        );
        Ok(Self {
            factor,
            original,
            working,
        })
    }

    /// The scale factor in `(0, 1]`.
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    /// Original image dimensions.
    #[must_use]
    pub const fn original(&self) -> Dimensions {
        self.original
    }

    /// Working grid dimensions.
    #[must_use]
    pub const fn working(&self) -> Dimensions {
        self.working
    }

    /// Whether the working grid is smaller than the original.
    #[must_use]
    pub fn is_downscaled(&self) -> bool {
        self.factor < 1.0
    }

    /// Map a working-space box to original space: `round(v / factor)`.
    #[must_use]
    pub fn to_original(&self, working: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            divide(working.x, self.factor),
            divide(working.y, self.factor),
            divide(working.w, self.factor),
            divide(working.h, self.factor),
        )
    }

    /// Map an original-space box to working space: `round(v * factor)`.
    #[must_use]
    pub fn to_working(&self, original: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            multiply(original.x, self.factor),
            multiply(original.y, self.factor),
            multiply(original.w, self.factor),
            multiply(original.h, self.factor),
        )
    }
}

fn scale_dimension(value: u32, factor: f64) -> u32 {
    multiply(value, factor).max(1)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn multiply(value: u32, factor: f64) -> u32 {
    (f64::from(value) * factor).round() as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn divide(value: u32, factor: f64) -> u32 {
    (f64::from(value) / factor).round() as u32
}

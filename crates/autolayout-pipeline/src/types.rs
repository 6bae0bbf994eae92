//! Shared types for the autolayout mask-to-region pipeline.

use serde::{Deserialize, Serialize};

use crate::morphology::MorphologyKind;
use crate::raster::ResampleFilter;

/// Re-export `GrayImage` so downstream crates can receive debug
/// snapshots without depending on `image` directly.
pub use image::GrayImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The larger of width and height.
    #[must_use]
    pub const fn long_axis(self) -> u32 {
        if self.width >= self.height {
            self.width
        } else {
            self.height
        }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Axis-aligned rectangle with non-negative integer coordinates.
///
/// A box is always expressed in a single coordinate space (working or
/// original); the type does not record which, so every function that
/// produces one documents the space it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl BoundingBox {
    /// Create a new bounding box.
    #[must_use]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Area (`w * h`), widened so large originals cannot overflow.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// A polygon outline returned by a segmentation service.
///
/// Points are expressed in the coordinate space of `frame`, which is
/// the size of the image that was actually sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonMask {
    /// Outline vertices, in order. The closing edge is implicit.
    pub points: Vec<Point>,
    /// Dimensions of the image the points refer to.
    pub frame: Dimensions,
}

/// Reference to a single-object mask as delivered by the service.
///
/// The pipeline only borrows the mask for the duration of
/// rasterization; nothing is retained afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMask {
    /// An encoded raster (PNG, JPEG, BMP, WebP). The first colour
    /// channel carries the mask.
    Encoded(Vec<u8>),
    /// A filled polygon outline.
    Polygon(PolygonMask),
}

/// One object returned by the segmentation service.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedMask {
    /// The mask raster or outline.
    pub mask: RawMask,
    /// Class label reported by the service, if any.
    pub label: Option<String>,
    /// Detection confidence reported by the service, if any.
    pub confidence: Option<f32>,
}

impl SegmentedMask {
    /// A mask with no label or confidence.
    #[must_use]
    pub const fn new(mask: RawMask) -> Self {
        Self {
            mask,
            label: None,
            confidence: None,
        }
    }

    /// Attach a class label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// An accepted region before reading-order sequencing.
///
/// Coordinates are in original-image space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCandidate {
    /// Index of the mask in the service response.
    pub mask_index: usize,
    /// Class label carried over from the mask.
    pub label: Option<String>,
    /// Confidence carried over from the mask.
    pub confidence: Option<f32>,
    /// Bounding box in original-image space.
    pub coords: BoundingBox,
}

/// A finalized layout region, in reading order.
///
/// Serializes as `{ "id": "item_001", "title": "Item 1", "coords": {...} }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedRegion {
    /// Stable identifier (`item_NNN`).
    pub id: String,
    /// Display title.
    pub title: String,
    /// Bounding box in original-image space.
    pub coords: BoundingBox,
}

/// Configuration for the mask-to-region pipeline.
///
/// All parameters have defaults tuned for full-page reference images.
/// Call [`validate`](Self::validate) before use when the config comes
/// from an untrusted source (CLI JSON, UI input).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fraction of the working width used as the opening ("shave")
    /// kernel size. Must lie in
    /// [`MIN_SHAVE_RATIO`](Self::MIN_SHAVE_RATIO)..=[`MAX_SHAVE_RATIO`](Self::MAX_SHAVE_RATIO).
    pub shave_ratio: f64,

    /// Longest axis of the working grid, in pixels. Larger originals
    /// are downscaled to this size for morphology.
    pub max_processing_size: u32,

    /// Closing kernel size at full resolution. Scaled by the working
    /// downscale factor, then forced odd and at least 3.
    pub close_base_kernel: u32,

    /// Regions whose original-space area is below
    /// `min_area_ratio * W0 * H0` are discarded as noise.
    pub min_area_ratio: f64,

    /// Vertical window (original pixels) used to bucket regions into the
    /// same reading-order row.
    pub row_tolerance: u32,

    /// First-channel intensity above which a mask pixel is foreground.
    pub threshold: u8,

    /// Filter used to resample encoded masks to the working size.
    pub resample_filter: ResampleFilter,

    /// Erode/dilate implementation.
    pub morphology: MorphologyKind,

    /// Use the service's class label as the region title when present,
    /// instead of the generic `Item N`.
    pub keep_labels: bool,
}

impl PipelineConfig {
    /// Default opening kernel ratio.
    pub const DEFAULT_SHAVE_RATIO: f64 = 0.02;
    /// Smallest accepted shave ratio.
    pub const MIN_SHAVE_RATIO: f64 = 0.005;
    /// Largest accepted shave ratio.
    pub const MAX_SHAVE_RATIO: f64 = 0.05;
    /// Default working resolution.
    pub const DEFAULT_MAX_PROCESSING_SIZE: u32 = 2000;
    /// Default full-resolution closing kernel.
    pub const DEFAULT_CLOSE_BASE_KERNEL: u32 = 15;
    /// Default noise-rejection area ratio.
    pub const DEFAULT_MIN_AREA_RATIO: f64 = 0.0005;
    /// Default reading-order row tolerance.
    pub const DEFAULT_ROW_TOLERANCE: u32 = 50;
    /// Default binarization threshold.
    pub const DEFAULT_THRESHOLD: u8 = 128;

    /// Check every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(Self::MIN_SHAVE_RATIO..=Self::MAX_SHAVE_RATIO).contains(&self.shave_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "shave_ratio {} outside [{}, {}]",
                self.shave_ratio,
                Self::MIN_SHAVE_RATIO,
                Self::MAX_SHAVE_RATIO,
            )));
        }
        if self.max_processing_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_processing_size must be at least 1".to_owned(),
            ));
        }
        if self.close_base_kernel == 0 {
            return Err(PipelineError::InvalidConfig(
                "close_base_kernel must be at least 1".to_owned(),
            ));
        }
        if !(0.0..1.0).contains(&self.min_area_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_area_ratio {} outside [0, 1)",
                self.min_area_ratio,
            )));
        }
        if self.row_tolerance == 0 {
            return Err(PipelineError::InvalidConfig(
                "row_tolerance must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Clamp `shave_ratio` into its accepted range.
    ///
    /// Returns `true` if the value had to be changed. A NaN ratio is
    /// replaced by the default.
    pub fn clamp_shave_ratio(&mut self) -> bool {
        let original = self.shave_ratio;
        self.shave_ratio = if original.is_nan() {
            Self::DEFAULT_SHAVE_RATIO
        } else {
            original.clamp(Self::MIN_SHAVE_RATIO, Self::MAX_SHAVE_RATIO)
        };
        self.shave_ratio.to_bits() != original.to_bits()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shave_ratio: Self::DEFAULT_SHAVE_RATIO,
            max_processing_size: Self::DEFAULT_MAX_PROCESSING_SIZE,
            close_base_kernel: Self::DEFAULT_CLOSE_BASE_KERNEL,
            min_area_ratio: Self::DEFAULT_MIN_AREA_RATIO,
            row_tolerance: Self::DEFAULT_ROW_TOLERANCE,
            threshold: Self::DEFAULT_THRESHOLD,
            resample_filter: ResampleFilter::default(),
            morphology: MorphologyKind::default(),
            keep_labels: false,
        }
    }
}

/// Errors that can occur while processing a mask.
///
/// None of these abort a batch on their own; the orchestrator records
/// them per mask and moves on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode an encoded raster.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The mask could not be turned into a grid for a reason other
    /// than codec failure (e.g. a zero-sized polygon frame).
    #[error("mask could not be rasterized: {0}")]
    MaskDecode(String),

    /// Image dimensions cannot be processed.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Reported width.
        width: u32,
        /// Reported height.
        height: u32,
    },

    /// A raw grid buffer does not match its declared dimensions.
    #[error("grid buffer has {actual} cells, expected {expected}")]
    InvalidGrid {
        /// `width * height`.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

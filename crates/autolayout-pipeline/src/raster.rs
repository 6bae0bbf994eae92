//! Mask rasterization: turn a [`RawMask`] into a binary working grid.
//!
//! Encoded masks are decoded, resampled to the working dimensions and
//! thresholded on their first colour channel. Polygon masks are scaled
//! from their frame into working space and filled directly, which skips
//! an intermediate full-size canvas.
//!
//! This is the first step of per-mask processing. Failures here are
//! per-mask: the orchestrator records them and continues with the next
//! mask.

use std::fmt;

use image::{GrayImage, Luma};
use imageproc::point::Point as PixelPoint;
use serde::{Deserialize, Serialize};

use crate::grid::BinaryGrid;
use crate::types::{Dimensions, PipelineError, Point, PolygonMask, RawMask};

/// How far outside the working grid, in multiples of its size, a
/// polygon vertex may lie. Anything further is rejected before it can
/// overflow the integer edge arithmetic of the polygon filler.
pub const POLYGON_REACH: f64 = 8.0;

/// Resampling filter used when an encoded mask is not already at the
/// working size.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky edges.
    Nearest,
    /// Bilinear interpolation, close to what a browser canvas does.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

impl ResampleFilter {
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Rasterize a mask onto a `working` sized grid.
///
/// A cell is foreground iff the first colour channel of the resampled
/// mask is strictly greater than `threshold`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for empty encoded bytes,
/// [`PipelineError::ImageDecode`] if the codec rejects them, and
/// [`PipelineError::MaskDecode`] for a polygon with a zero-sized frame
/// or a vertex more than [`POLYGON_REACH`] working sizes off the grid.
pub fn rasterize(
    mask: &RawMask,
    working: Dimensions,
    threshold: u8,
    filter: ResampleFilter,
) -> Result<BinaryGrid, PipelineError> {
    let channel = match mask {
        RawMask::Encoded(bytes) => first_channel(bytes, working, filter)?,
        RawMask::Polygon(polygon) => fill_polygon(polygon, working)?,
    };
    Ok(BinaryGrid::from_gray(&channel, threshold))
}

/// Decode, resample to `working`, and keep only the first channel.
fn first_channel(
    bytes: &[u8],
    working: Dimensions,
    filter: ResampleFilter,
) -> Result<GrayImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let rgba = if rgba.dimensions() == (working.width, working.height) {
        rgba
    } else {
        image::imageops::resize(
            &rgba,
            working.width,
            working.height,
            filter.to_image_filter(),
        )
    };

    Ok(GrayImage::from_fn(working.width, working.height, |x, y| {
        Luma([rgba.get_pixel(x, y).0[0]])
    }))
}

/// Fill a polygon, scaled from its frame into working space, white on
/// black.
fn fill_polygon(polygon: &PolygonMask, working: Dimensions) -> Result<GrayImage, PipelineError> {
    let frame = polygon.frame;
    if frame.width == 0 || frame.height == 0 {
        return Err(PipelineError::MaskDecode(format!(
            "polygon frame is {}x{}",
            frame.width, frame.height
        )));
    }

    let sx = f64::from(working.width) / f64::from(frame.width);
    let sy = f64::from(working.height) / f64::from(frame.height);
    let vertices = polygon_vertices(&polygon.points, sx, sy, working)?;

    let mut canvas = GrayImage::new(working.width, working.height);
    if vertices.len() >= 3 {
        imageproc::drawing::draw_polygon_mut(&mut canvas, &vertices, Luma([255]));
    }
    Ok(canvas)
}

/// Scale and round outline points, dropping consecutive duplicates and
/// a closing point equal to the first. `draw_polygon_mut` rejects an
/// explicitly closed outline.
#[allow(clippy::cast_possible_truncation)]
fn polygon_vertices(
    points: &[Point],
    sx: f64,
    sy: f64,
    working: Dimensions,
) -> Result<Vec<PixelPoint<i32>>, PipelineError> {
    let reach_x = POLYGON_REACH * f64::from(working.width);
    let reach_y = POLYGON_REACH * f64::from(working.height);

    let mut vertices: Vec<PixelPoint<i32>> = Vec::with_capacity(points.len());
    for p in points {
        if !(p.x.is_finite() && p.y.is_finite()) {
            continue;
        }
        let (x, y) = ((p.x * sx).round(), (p.y * sy).round());
        if x.abs() > reach_x || y.abs() > reach_y {
            return Err(PipelineError::MaskDecode(format!(
                "polygon point ({}, {}) is far outside the {}x{} frame",
                p.x, p.y, working.width, working.height
            )));
        }
        let v = PixelPoint::new(x as i32, y as i32);
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    Ok(vertices)
}

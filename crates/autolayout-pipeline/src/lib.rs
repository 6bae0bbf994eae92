//! autolayout-pipeline: turn segmentation masks into ordered layout
//! regions (sans-IO).
//!
//! Each mask goes through:
//! rasterize -> threshold -> open ("shave") -> close -> bounding box ->
//! area filter. Accepted boxes from the whole batch are then sorted into
//! reading order and numbered.
//!
//! This crate has **no I/O dependencies**: masks arrive as in-memory
//! bytes or polygons and results are plain data. Talking to a
//! segmentation service lives in `autolayout-detect`.

pub mod diagnostics;
pub mod grid;
pub mod morphology;
pub mod observer;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod scale;
pub mod sequence;
pub mod types;

use std::time::{Duration, Instant};

pub use diagnostics::{BatchDiagnostics, MaskDiagnostics, MaskVerdict, StageCounts};
pub use grid::BinaryGrid;
pub use morphology::{Kernel, Morphology, MorphologyKind};
pub use observer::{CollectingObserver, DebugTarget, Snapshot, StageObserver};
pub use pipeline::{BatchPlan, MaskPipeline, MaskReport, process_mask};
pub use raster::ResampleFilter;
pub use region::RegionOutcome;
pub use scale::{Scale, compute_scale};
pub use types::{
    BoundingBox, DetectedRegion, Dimensions, GrayImage, PipelineConfig, PipelineError, Point,
    PolygonMask, RawMask, RegionCandidate, SegmentedMask,
};

/// Regions and diagnostics for one batch of masks.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Accepted regions in reading order.
    pub regions: Vec<DetectedRegion>,
    /// Per-mask and per-batch diagnostics.
    pub diagnostics: BatchDiagnostics,
}

/// Run every mask of a batch, one after another.
///
/// Per-mask failures never abort the batch; they are recorded in the
/// diagnostics. When `debug` is set, the observer receives the three
/// refinement snapshots of the targeted mask.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is invalid and
/// [`PipelineError::InvalidDimensions`] if `original` is zero-sized.
pub fn process_masks(
    masks: &[SegmentedMask],
    original: Dimensions,
    config: &PipelineConfig,
    debug: Option<DebugTarget<'_>>,
) -> Result<BatchResult, PipelineError> {
    let start = Instant::now();
    let plan = BatchPlan::new(original, config)?;

    let reports: Vec<MaskReport> = masks
        .iter()
        .enumerate()
        .map(|(i, mask)| process_mask(i, mask, &plan, debug))
        .collect();

    Ok(assemble(&plan, reports, start.elapsed()))
}

/// Sequence the accepted candidates of a batch and collect its
/// diagnostics.
///
/// `reports` may arrive in any order (for example from a worker pool);
/// diagnostics are sorted by mask index and regions by reading order.
#[must_use]
pub fn assemble(plan: &BatchPlan, reports: Vec<MaskReport>, total_duration: Duration) -> BatchResult {
    let mut candidates = Vec::new();
    let mut masks = Vec::with_capacity(reports.len());
    for report in reports {
        candidates.extend(report.candidate);
        masks.push(report.diagnostics);
    }
    masks.sort_by_key(|m| m.index);

    let config = plan.config();
    let regions = sequence::sequence(candidates, config.row_tolerance, config.keep_labels);

    tracing::info!(
        masks = masks.len(),
        regions = regions.len(),
        elapsed_ms = total_duration.as_millis(),
        "batch complete",
    );

    let scale = plan.scale();
    BatchResult {
        regions,
        diagnostics: BatchDiagnostics {
            original: scale.original(),
            working: scale.working(),
            scale: scale.factor(),
            shave_kernel: plan.shave_kernel().size(),
            close_kernel: plan.close_kernel().size(),
            min_area: plan.min_area(),
            masks,
            total_duration,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Encode an RGBA image as PNG bytes.
    fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    /// A white rectangle on black, as a service mask raster.
    fn rect_png(dims: Dimensions, x0: u32, y0: u32, x1: u32, y1: u32) -> SegmentedMask {
        let img = image::RgbaImage::from_fn(dims.width, dims.height, |x, y| {
            if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        SegmentedMask::new(RawMask::Encoded(encode_png(&img)))
    }

    #[test]
    fn process_masks_rejects_zero_sized_image() {
        let result = process_masks(&[], Dimensions::new(0, 10), &PipelineConfig::default(), None);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn empty_batch_has_no_regions() {
        let result =
            process_masks(&[], Dimensions::new(400, 300), &PipelineConfig::default(), None).unwrap();
        assert!(result.regions.is_empty());
        assert!(result.diagnostics.masks.is_empty());
    }

    #[test]
    fn regions_are_numbered_in_reading_order() {
        let dims = Dimensions::new(400, 300);
        // Second row first, then the right-hand item of the first row.
        let masks = vec![
            rect_png(dims, 20, 180, 120, 260),
            rect_png(dims, 220, 20, 360, 120),
            rect_png(dims, 20, 25, 160, 125),
        ];
        let result = process_masks(&masks, dims, &PipelineConfig::default(), None).unwrap();

        let ids: Vec<&str> = result.regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["item_001", "item_002", "item_003"]);
        let xs: Vec<u32> = result.regions.iter().map(|r| r.coords.x).collect();
        let ys: Vec<u32> = result.regions.iter().map(|r| r.coords.y).collect();
        assert_eq!(xs, vec![20, 220, 20]);
        assert_eq!(ys, vec![25, 20, 180]);
        assert_eq!(result.regions[2].title, "Item 3");
    }

    #[test]
    fn bad_mask_does_not_affect_others() {
        let dims = Dimensions::new(400, 300);
        let masks = vec![
            rect_png(dims, 20, 20, 200, 150),
            SegmentedMask::new(RawMask::Encoded(vec![0xFF, 0x00])),
            rect_png(dims, 250, 20, 380, 150),
        ];
        let result = process_masks(&masks, dims, &PipelineConfig::default(), None).unwrap();
        assert_eq!(result.regions.len(), 2);
        assert_eq!(result.diagnostics.failed_count(), 1);
        assert!(matches!(
            result.diagnostics.masks[1].verdict,
            MaskVerdict::DecodeFailed { .. }
        ));
    }

    #[test]
    fn runaway_polygon_fails_alone() {
        let dims = Dimensions::new(400, 300);
        let runaway = SegmentedMask::new(RawMask::Polygon(PolygonMask {
            points: vec![
                Point::new(-1e12, -1e12),
                Point::new(1e12, -1e12),
                Point::new(1e12, 1e12),
            ],
            frame: dims,
        }));
        let masks = vec![runaway, rect_png(dims, 20, 20, 200, 150)];
        let result = process_masks(&masks, dims, &PipelineConfig::default(), None).unwrap();

        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].coords.x, 20);
        assert!(matches!(
            result.diagnostics.masks[0].verdict,
            MaskVerdict::DecodeFailed { .. }
        ));
    }

    #[test]
    fn downscaled_masks_map_back_to_original_space() {
        // 1200x800 with max 600 -> scale 0.5, working 600x400.
        let dims = Dimensions::new(1200, 800);
        let config = PipelineConfig {
            max_processing_size: 600,
            ..PipelineConfig::default()
        };
        let masks = vec![rect_png(dims, 200, 100, 599, 499)];
        let result = process_masks(&masks, dims, &config, None).unwrap();

        assert_eq!(result.diagnostics.working, Dimensions::new(600, 400));
        let coords = result.regions[0].coords;
        for (got, want) in [(coords.x, 200), (coords.y, 100), (coords.w, 400), (coords.h, 400)] {
            assert!(
                got.abs_diff(want) <= 4,
                "expected ~{want}, got {got} in {coords:?}"
            );
        }
    }

    #[test]
    fn assemble_is_independent_of_report_order() {
        let dims = Dimensions::new(400, 300);
        let plan = BatchPlan::new(dims, &PipelineConfig::default()).unwrap();
        let masks = [
            rect_png(dims, 220, 20, 360, 120),
            rect_png(dims, 20, 25, 160, 125),
        ];
        let reports: Vec<MaskReport> = masks
            .iter()
            .enumerate()
            .map(|(i, m)| process_mask(i, m, &plan, None))
            .collect();
        let mut reversed = reports.clone();
        reversed.reverse();

        let a = assemble(&plan, reports, Duration::ZERO);
        let b = assemble(&plan, reversed, Duration::ZERO);
        assert_eq!(a.regions, b.regions);
        assert_eq!(b.diagnostics.masks[0].index, 0);
    }

    #[test]
    fn result_serializes_like_the_layout_format() {
        let dims = Dimensions::new(400, 300);
        let result = process_masks(
            &[rect_png(dims, 20, 20, 200, 150)],
            dims,
            &PipelineConfig::default(),
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&result.regions).unwrap();
        assert_eq!(json[0]["id"], "item_001");
        assert_eq!(json[0]["title"], "Item 1");
        assert_eq!(json[0]["coords"]["x"], 20);
        assert_eq!(json[0]["coords"]["w"], 180);
    }
}

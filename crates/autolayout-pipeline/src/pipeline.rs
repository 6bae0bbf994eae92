//! Incremental per-mask pipeline: advance stage by stage, inspecting
//! each intermediate grid before continuing.
//!
//! ```rust
//! # use autolayout_pipeline::{BatchPlan, Dimensions, MaskPipeline, PipelineConfig, PipelineError, RawMask};
//! # fn run(mask: &RawMask) -> Result<(), PipelineError> {
//! let plan = BatchPlan::new(Dimensions::new(4000, 3000), &PipelineConfig::default())?;
//! let outcome = MaskPipeline::new(mask, &plan)
//!     .rasterize()?
//!     .open()
//!     .close()
//!     .extract();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state. Only
//! the current grid is kept: a stage drops its predecessor's buffer,
//! so at most two working grids are alive at once.
//!
//! [`process_mask`] drives the whole chain for one mask of a batch,
//! turning failures and rejections into diagnostics.

use std::time::Instant;

use crate::diagnostics::{MaskDiagnostics, MaskVerdict, StageCounts};
use crate::grid::BinaryGrid;
use crate::morphology::{Kernel, Morphology, close_kernel, shave_kernel};
use crate::observer::{self, DebugTarget};
use crate::region::{RegionOutcome, extract_region, min_area};
use crate::scale::Scale;
use crate::types::{Dimensions, PipelineConfig, PipelineError, RawMask, RegionCandidate, SegmentedMask};

/// Per-image constants, computed once and shared by every mask.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    config: PipelineConfig,
    scale: Scale,
    shave: Kernel,
    close: Kernel,
    min_area: f64,
}

impl BatchPlan {
    /// Derive the plan for an original image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation and [`PipelineError::InvalidDimensions`] for a
    /// zero-sized image.
    pub fn new(original: Dimensions, config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let scale = Scale::new(original, config.max_processing_size)?;
        let shave = shave_kernel(scale.working().width, config.shave_ratio);
        let close = close_kernel(config.close_base_kernel, scale.factor());
        let min_area = min_area(&scale, config.min_area_ratio);

        tracing::debug!(
            original_w = original.width,
            original_h = original.height,
            working_w = scale.working().width,
            working_h = scale.working().height,
            scale = scale.factor(),
            shave_k = shave.size(),
            close_k = close.size(),
            min_area,
            "batch plan",
        );

        Ok(Self {
            config: config.clone(),
            scale,
            shave,
            close,
            min_area,
        })
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Scale between original and working space.
    #[must_use]
    pub const fn scale(&self) -> &Scale {
        &self.scale
    }

    /// Opening kernel.
    #[must_use]
    pub const fn shave_kernel(&self) -> Kernel {
        self.shave
    }

    /// Closing kernel.
    #[must_use]
    pub const fn close_kernel(&self) -> Kernel {
        self.close
    }

    /// Smallest accepted region area, in original pixels.
    #[must_use]
    pub const fn min_area(&self) -> f64 {
        self.min_area
    }
}

// ───────────────────────── Stage 0: MaskPipeline ─────────────────────

/// A mask that has not been touched yet.
#[must_use = "pipeline stages are consumed by advancing; call .rasterize() to continue"]
#[derive(Debug)]
pub struct MaskPipeline<'a> {
    mask: &'a RawMask,
    plan: &'a BatchPlan,
}

impl<'a> MaskPipeline<'a> {
    /// Start processing `mask` under `plan`.
    pub const fn new(mask: &'a RawMask, plan: &'a BatchPlan) -> Self {
        Self { mask, plan }
    }

    /// Rasterize onto the working grid and threshold.
    ///
    /// # Errors
    ///
    /// Propagates rasterization failures (see [`crate::raster::rasterize`]).
    pub fn rasterize(self) -> Result<Rasterized<'a>, PipelineError> {
        let config = &self.plan.config;
        let grid = crate::raster::rasterize(
            self.mask,
            self.plan.scale.working(),
            config.threshold,
            config.resample_filter,
        )?;
        Ok(Rasterized {
            plan: self.plan,
            grid,
        })
    }
}

// ───────────────────────── Stage 1: Rasterized ───────────────────────

/// Thresholded mask at working resolution.
#[must_use = "pipeline stages are consumed by advancing; call .open() to continue"]
#[derive(Debug)]
pub struct Rasterized<'a> {
    plan: &'a BatchPlan,
    grid: BinaryGrid,
}

impl<'a> Rasterized<'a> {
    /// The thresholded grid.
    #[must_use]
    pub const fn grid(&self) -> &BinaryGrid {
        &self.grid
    }

    /// Open with the shave kernel, cutting thin bridges to neighbouring
    /// objects and removing specks.
    pub fn open(self) -> Opened<'a> {
        let morphology = self.plan.config.morphology;
        let grid = morphology.open(&self.grid, self.plan.shave);
        Opened {
            plan: self.plan,
            grid,
        }
    }
}

// ───────────────────────── Stage 2: Opened ───────────────────────────

/// Mask after opening.
#[must_use = "pipeline stages are consumed by advancing; call .close() to continue"]
#[derive(Debug)]
pub struct Opened<'a> {
    plan: &'a BatchPlan,
    grid: BinaryGrid,
}

impl<'a> Opened<'a> {
    /// The opened grid.
    #[must_use]
    pub const fn grid(&self) -> &BinaryGrid {
        &self.grid
    }

    /// Close with the scaled close kernel, filling small holes.
    pub fn close(self) -> Closed<'a> {
        let morphology = self.plan.config.morphology;
        let grid = morphology.close(&self.grid, self.plan.close);
        Closed {
            plan: self.plan,
            grid,
        }
    }
}

// ───────────────────────── Stage 3: Closed ───────────────────────────

/// Fully refined mask.
#[must_use = "pipeline stages are consumed by advancing; call .extract() to finish"]
#[derive(Debug)]
pub struct Closed<'a> {
    plan: &'a BatchPlan,
    grid: BinaryGrid,
}

impl Closed<'_> {
    /// The closed grid.
    #[must_use]
    pub const fn grid(&self) -> &BinaryGrid {
        &self.grid
    }

    /// Bounding box in original space, filtered by area.
    #[must_use]
    pub fn extract(self) -> RegionOutcome {
        extract_region(&self.grid, &self.plan.scale, self.plan.min_area)
    }
}

// ───────────────────────── Driver ────────────────────────────────────

/// Result of processing one mask of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskReport {
    /// The accepted region, if any.
    pub candidate: Option<RegionCandidate>,
    /// What happened to the mask.
    pub diagnostics: MaskDiagnostics,
}

/// Run one mask through the whole chain.
///
/// Never fails: a rasterization error becomes a
/// [`MaskVerdict::DecodeFailed`] entry and a rejected region a
/// [`MaskVerdict::BelowMinArea`] or [`MaskVerdict::NoForeground`]
/// entry. When `debug` targets this mask, the observer receives the
/// thresholded, opened and closed rasters.
#[must_use]
pub fn process_mask(
    index: usize,
    mask: &SegmentedMask,
    plan: &BatchPlan,
    debug: Option<DebugTarget<'_>>,
) -> MaskReport {
    let start = Instant::now();
    let debug = debug.filter(|d| d.mask_index == index);
    let label = mask.label.clone();

    let rasterized = match MaskPipeline::new(&mask.mask, plan).rasterize() {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(mask = index, error = %e, "mask could not be rasterized, skipping");
            return MaskReport {
                candidate: None,
                diagnostics: MaskDiagnostics {
                    index,
                    label,
                    verdict: MaskVerdict::DecodeFailed {
                        message: e.to_string(),
                    },
                    duration: start.elapsed(),
                    foreground: None,
                },
            };
        }
    };

    let name = debug.map(|_| observer::mask_name(index, mask.label.as_deref()));
    let emit = |title: &dyn Fn(&str) -> String, grid: &BinaryGrid| {
        if let (Some(target), Some(name)) = (debug, name.as_deref()) {
            target.observer.on_stage(&title(name), &grid.to_gray());
        }
    };

    let thresholded = rasterized.grid().count_foreground();
    emit(
        &|n| observer::original_title(n, plan.scale.working()),
        rasterized.grid(),
    );

    let opened = rasterized.open();
    let opened_count = opened.grid().count_foreground();
    emit(&|n| observer::shaved_title(n, plan.shave), opened.grid());

    let closed = opened.close();
    let closed_count = closed.grid().count_foreground();
    emit(&observer::closed_title, closed.grid());

    let outcome = closed.extract();
    log_outcome(index, &outcome);

    let candidate = outcome.accepted().map(|coords| RegionCandidate {
        mask_index: index,
        label: mask.label.clone(),
        confidence: mask.confidence,
        coords,
    });

    MaskReport {
        candidate,
        diagnostics: MaskDiagnostics {
            index,
            label,
            verdict: outcome.into(),
            duration: start.elapsed(),
            foreground: Some(StageCounts {
                thresholded,
                opened: opened_count,
                closed: closed_count,
            }),
        },
    }
}

fn log_outcome(index: usize, outcome: &RegionOutcome) {
    match outcome {
        RegionOutcome::Accepted(b) => {
            tracing::debug!(mask = index, x = b.x, y = b.y, w = b.w, h = b.h, "region accepted");
        }
        RegionOutcome::Empty => {
            tracing::debug!(mask = index, "no foreground after morphology");
        }
        RegionOutcome::BelowMinArea { area, min_area, .. } => {
            tracing::debug!(mask = index, area, min_area, "region below minimum area");
        }
    }
}

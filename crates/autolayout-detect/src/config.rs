use autolayout_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::client::Thresholds;

/// Where masks are refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// On the calling task, yielding to the runtime every few masks.
    #[default]
    Sequential,
    /// On the rayon pool, inside `spawn_blocking`.
    Parallel,
}

/// Configuration for a [`Detector`](crate::Detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Mask refinement parameters. `shave_ratio` is overridden per
    /// request.
    pub pipeline: PipelineConfig,
    /// Sequential or parallel refinement.
    pub execution: ExecutionMode,
    /// In sequential mode, yield after this many masks. Zero never
    /// yields.
    pub yield_every: usize,
    /// Thresholds forwarded to the segmentation service.
    pub thresholds: Thresholds,
}

impl DetectorConfig {
    /// Default number of masks between yields.
    pub const DEFAULT_YIELD_EVERY: usize = 3;
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            execution: ExecutionMode::default(),
            yield_every: Self::DEFAULT_YIELD_EVERY,
            thresholds: Thresholds::default(),
        }
    }
}

/// Interpret a raw debug index: negative disables debugging.
#[must_use]
pub fn debug_index_from_raw(raw: i64) -> Option<usize> {
    usize::try_from(raw).ok()
}

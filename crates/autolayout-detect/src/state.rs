//! Detection state machine and status reporting.
//!
//! ```text
//! Idle -> Connecting -> Requesting -> ProcessingMask[i] -> Sequencing -> Done
//!                                                                     -> Cancelled
//!          any step before ProcessingMask                             -> Failed
//! ```
//!
//! `Connecting` is skipped when a session already exists. Every
//! transition is published on a `tokio::sync::watch` channel together
//! with a status line meant for display.

use std::fmt;

use autolayout_pipeline::BatchDiagnostics;
use autolayout_pipeline::DetectedRegion;
use serde::{Deserialize, Serialize};

/// Where a detection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectState {
    /// Nothing running.
    Idle,
    /// Establishing the service session.
    Connecting,
    /// Waiting for the service to return masks.
    Requesting,
    /// Refining mask `index` of `total`.
    ProcessingMask {
        /// Zero-based mask index.
        index: usize,
        /// Number of masks in the batch.
        total: usize,
    },
    /// Sorting accepted regions into reading order.
    Sequencing,
    /// Finished normally.
    Done,
    /// Stopped early on request; partial results were returned.
    Cancelled,
    /// Aborted before producing results.
    Failed,
}

impl DetectState {
    /// Whether no further transition will happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for DetectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Connecting => f.write_str("Connecting to segmentation service..."),
            Self::Requesting => f.write_str("Analyzing image..."),
            Self::ProcessingMask { index, total } => {
                write!(f, "Refining mask {}/{total}...", index + 1)
            }
            Self::Sequencing => f.write_str("Ordering regions..."),
            Self::Done => f.write_str("Done"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

/// A published state with its status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Current state.
    pub state: DetectState,
    /// Human-readable status.
    pub message: String,
}

impl Progress {
    /// Progress whose message is the state's default text.
    #[must_use]
    pub fn new(state: DetectState) -> Self {
        Self {
            state,
            message: state.to_string(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(DetectState::Idle)
    }
}

/// How a detection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    /// All masks were processed.
    Done,
    /// Stopped early; regions are partial.
    Cancelled,
    /// Nothing was processed; regions are empty.
    Failed,
}

/// Final status of a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectStatus {
    /// Outcome class.
    pub kind: StatusKind,
    /// Human-readable detail.
    pub message: String,
}

/// Everything a detection produced. Never an error: failures are
/// reported through `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectOutcome {
    /// Regions in reading order. Empty when `status.kind` is `Failed`.
    pub regions: Vec<DetectedRegion>,
    /// How the detection ended.
    pub status: DetectStatus,
    /// Batch diagnostics; `None` if the detection failed before any
    /// mask could be planned.
    pub diagnostics: Option<BatchDiagnostics>,
}

impl DetectOutcome {
    /// Whether the detection ended in `Failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status.kind == StatusKind::Failed
    }
}

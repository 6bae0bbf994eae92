//! autolayout-detect: async orchestration around the mask pipeline.
//!
//! Connects to a segmentation service once, asks it for one mask per
//! object, refines every mask with `autolayout-pipeline` (on the
//! calling task or on a rayon pool) and returns regions in reading
//! order. State transitions are published on a `tokio::sync::watch`
//! channel; failures are reported in the outcome, never as `Err`.

pub mod cancel;
pub mod client;
pub mod config;
pub mod detector;
pub mod state;

pub use autolayout_pipeline;
pub use cancel::CancellationToken;
pub use client::{
    Credentials, SegmentRequest, SegmentationClient, SegmentationError, SegmentationSession,
    StaticSegmentationClient, Thresholds,
};
pub use config::{DetectorConfig, ExecutionMode, debug_index_from_raw};
pub use detector::{DetectError, DetectRequest, Detector};
pub use state::{DetectOutcome, DetectState, DetectStatus, Progress, StatusKind};

//! The detection orchestrator.
//!
//! A [`Detector`] owns a [`SegmentationClient`] and, after the first
//! successful connect, the session it produced. Each call to
//! [`Detector::detect`] walks the state machine in [`crate::state`]:
//! request masks, refine each one, then sequence the survivors.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use autolayout_pipeline::{
    BatchPlan, DebugTarget, Dimensions, MaskReport, PipelineError, SegmentedMask, StageObserver,
    assemble, process_mask,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::sync::{OnceCell, watch};

use crate::cancel::CancellationToken;
use crate::client::{Credentials, SegmentRequest, SegmentationClient, SegmentationError, SegmentationSession};
use crate::config::{DetectorConfig, ExecutionMode};
use crate::state::{DetectOutcome, DetectState, DetectStatus, Progress, StatusKind};

/// Reasons a detection ends in `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Connecting or requesting failed.
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    /// The source image could not be read.
    #[error("failed to read source image: {0}")]
    SourceImage(#[from] image::ImageError),

    /// The plan could not be built.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A refinement worker died.
    #[error("mask worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// One detection call.
#[derive(Clone)]
pub struct DetectRequest {
    /// Encoded source image.
    pub image: Vec<u8>,
    /// What to look for.
    pub prompt: String,
    /// Opening kernel ratio; clamped into the accepted range.
    pub shave_ratio: f64,
    /// Credentials used if no session exists yet.
    pub credentials: Credentials,
    /// Mask whose refinement snapshots are sent to `observer`.
    pub debug_index: Option<usize>,
    /// Receiver for debug snapshots.
    pub observer: Option<Arc<dyn StageObserver>>,
    /// Stop flag, checked between masks.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for DetectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectRequest")
            .field("image_bytes", &self.image.len())
            .field("prompt", &self.prompt)
            .field("shave_ratio", &self.shave_ratio)
            .field("debug_index", &self.debug_index)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl DetectRequest {
    /// A request with default shave ratio and no debugging.
    #[must_use]
    pub fn new(image: Vec<u8>, prompt: impl Into<String>) -> Self {
        Self {
            image,
            prompt: prompt.into(),
            shave_ratio: autolayout_pipeline::PipelineConfig::DEFAULT_SHAVE_RATIO,
            credentials: Credentials::new(),
            debug_index: None,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the shave ratio.
    #[must_use]
    pub fn with_shave_ratio(mut self, ratio: f64) -> Self {
        self.shave_ratio = ratio;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Observe one mask. `index` is zero-based; `None` disables.
    #[must_use]
    pub fn with_debug(mut self, index: Option<usize>, observer: Arc<dyn StageObserver>) -> Self {
        self.debug_index = index;
        self.observer = Some(observer);
        self
    }

    /// Use an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Orchestrates segmentation and mask refinement.
pub struct Detector<C> {
    client: C,
    config: DetectorConfig,
    session: OnceCell<Box<dyn SegmentationSession>>,
    progress: Arc<watch::Sender<Progress>>,
}

impl<C> std::fmt::Debug for Detector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("config", &self.config)
            .field("connected", &self.session.initialized())
            .finish_non_exhaustive()
    }
}

impl<C: SegmentationClient> Detector<C> {
    /// Create a detector. Nothing is connected until the first
    /// [`detect`](Self::detect).
    #[must_use]
    pub fn new(client: C, config: DetectorConfig) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            client,
            config,
            session: OnceCell::new(),
            progress: Arc::new(progress),
        }
    }

    /// The wrapped client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The detector configuration.
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Whether a session has been established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }

    /// Run one detection.
    ///
    /// Never returns an error: connection, request and source-image
    /// failures produce an empty result with a `Failed` status, and
    /// per-mask failures only show up in the diagnostics.
    pub async fn detect(&self, request: DetectRequest) -> DetectOutcome {
        let start = Instant::now();
        match self.run(&request, start).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "detection failed");
                let message = e.to_string();
                self.publish(DetectState::Failed, message.clone());
                DetectOutcome {
                    regions: Vec::new(),
                    status: DetectStatus {
                        kind: StatusKind::Failed,
                        message,
                    },
                    diagnostics: None,
                }
            }
        }
    }

    async fn run(&self, request: &DetectRequest, start: Instant) -> Result<DetectOutcome, DetectError> {
        let mut pipeline = self.config.pipeline.clone();
        pipeline.shave_ratio = request.shave_ratio;
        if pipeline.clamp_shave_ratio() {
            tracing::warn!(
                requested = request.shave_ratio,
                used = pipeline.shave_ratio,
                "shave ratio out of range, clamped",
            );
        }

        let original = source_dimensions(&request.image)?;
        let plan = BatchPlan::new(original, &pipeline)?;

        let session = self.session(&request.credentials).await?;

        self.publish_state(DetectState::Requesting);
        let masks = session
            .segment(&SegmentRequest {
                image: &request.image,
                prompt: &request.prompt,
                thresholds: self.config.thresholds,
            })
            .await?;
        let total = masks.len();
        tracing::info!(masks = total, prompt = %request.prompt, "segmentation returned");

        let reports = match self.config.execution {
            ExecutionMode::Sequential => self.refine_sequential(&masks, &plan, request).await,
            ExecutionMode::Parallel => self.refine_parallel(masks, &plan, request).await?,
        };
        let processed = reports.len();
        let cancelled = processed < total;

        self.publish_state(DetectState::Sequencing);
        let result = assemble(&plan, reports, start.elapsed());
        let found = result.regions.len();

        let (state, kind, message) = if cancelled {
            tracing::info!(processed, total, regions = found, "detection cancelled");
            (
                DetectState::Cancelled,
                StatusKind::Cancelled,
                format!("Cancelled after {processed} of {total} masks; kept {found} regions"),
            )
        } else if total == 0 {
            (
                DetectState::Done,
                StatusKind::Done,
                "No objects detected".to_owned(),
            )
        } else if found == 0 {
            (
                DetectState::Done,
                StatusKind::Done,
                format!("No usable regions in {total} masks"),
            )
        } else {
            (
                DetectState::Done,
                StatusKind::Done,
                format!("Found {found} regions"),
            )
        };
        self.publish(state, message.clone());

        Ok(DetectOutcome {
            regions: result.regions,
            status: DetectStatus { kind, message },
            diagnostics: Some(result.diagnostics),
        })
    }

    /// The shared session, connecting on first use. A failed connect
    /// leaves the cell empty so the next call retries.
    async fn session(&self, credentials: &Credentials) -> Result<&dyn SegmentationSession, SegmentationError> {
        if !self.session.initialized() {
            self.publish_state(DetectState::Connecting);
        }
        let session = self
            .session
            .get_or_try_init(|| async {
                tracing::info!("connecting to segmentation service");
                self.client.connect(credentials).await
            })
            .await?;
        Ok(session.as_ref())
    }

    async fn refine_sequential(
        &self,
        masks: &[SegmentedMask],
        plan: &BatchPlan,
        request: &DetectRequest,
    ) -> Vec<MaskReport> {
        let total = masks.len();
        let debug = debug_target(request);
        let mut reports = Vec::with_capacity(total);

        for (index, mask) in masks.iter().enumerate() {
            if request.cancel.is_cancelled() {
                break;
            }
            self.publish_state(DetectState::ProcessingMask { index, total });
            reports.push(process_mask(index, mask, plan, debug));

            if self.config.yield_every > 0 && (index + 1) % self.config.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        reports
    }

    async fn refine_parallel(
        &self,
        masks: Vec<SegmentedMask>,
        plan: &BatchPlan,
        request: &DetectRequest,
    ) -> Result<Vec<MaskReport>, DetectError> {
        let plan = plan.clone();
        let observer = request.observer.clone();
        let debug_index = request.debug_index;
        let cancel = request.cancel.clone();
        let progress = Arc::clone(&self.progress);

        let reports = tokio::task::spawn_blocking(move || {
            let total = masks.len();
            let debug = debug_index
                .zip(observer.as_deref())
                .map(|(mask_index, observer)| DebugTarget {
                    mask_index,
                    observer,
                });
            let collected = Mutex::new(Vec::with_capacity(total));

            masks.par_iter().enumerate().for_each(|(index, mask)| {
                if cancel.is_cancelled() {
                    return;
                }
                progress.send_replace(Progress::new(DetectState::ProcessingMask { index, total }));
                let report = process_mask(index, mask, &plan, debug);
                collected.lock().push(report);
            });
            collected.into_inner()
        })
        .await?;
        Ok(reports)
    }

    fn publish_state(&self, state: DetectState) {
        self.progress.send_replace(Progress::new(state));
    }

    fn publish(&self, state: DetectState, message: String) {
        self.progress.send_replace(Progress { state, message });
    }
}

fn debug_target(request: &DetectRequest) -> Option<DebugTarget<'_>> {
    let mask_index = request.debug_index?;
    let observer = request.observer.as_deref()?;
    Some(DebugTarget {
        mask_index,
        observer,
    })
}

/// Read the source image size without decoding pixels.
fn source_dimensions(bytes: &[u8]) -> Result<Dimensions, DetectError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput.into());
    }
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_dimensions()?;
    Ok(Dimensions::new(width, height))
}

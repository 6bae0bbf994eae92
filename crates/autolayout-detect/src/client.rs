//! The segmentation-service capability.
//!
//! A [`SegmentationClient`] opens a [`SegmentationSession`] once from
//! opaque credentials; the session turns an image and a text prompt
//! into one mask per detected object. Concrete services implement both
//! traits (see the `autolayout-roboflow` crate); [`StaticSegmentationClient`]
//! serves a fixed mask list for local files and tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use autolayout_pipeline::SegmentedMask;
use serde::{Deserialize, Serialize};

/// Errors raised while talking to a segmentation service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentationError {
    /// The service could not be reached.
    #[error("segmentation service unreachable: {0}")]
    Unreachable(String),

    /// Credentials were missing or rejected.
    #[error("segmentation service rejected credentials: {0}")]
    Unauthorized(String),

    /// The service answered with something that is not a mask list.
    #[error("malformed segmentation response: {0}")]
    MalformedResponse(String),
}

/// Opaque key/value credentials, interpreted by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Empty credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a non-empty value.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::Unauthorized`] naming the missing key.
    pub fn require(&self, key: &str) -> Result<&str, SegmentationError> {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(SegmentationError::Unauthorized(format!(
                "missing credential `{key}`"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Detection thresholds forwarded to the service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum object confidence.
    pub confidence: f32,
    /// Mask binarization threshold used by the service.
    pub mask: f32,
}

impl Thresholds {
    /// Default object confidence.
    pub const DEFAULT_CONFIDENCE: f32 = 0.3;
    /// Default mask threshold.
    pub const DEFAULT_MASK: f32 = 0.5;
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: Self::DEFAULT_CONFIDENCE,
            mask: Self::DEFAULT_MASK,
        }
    }
}

/// One segmentation call.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRequest<'a> {
    /// Encoded source image.
    pub image: &'a [u8],
    /// Free-text description of the objects to find.
    pub prompt: &'a str,
    /// Detection thresholds.
    pub thresholds: Thresholds,
}

/// Factory for sessions.
#[async_trait]
pub trait SegmentationClient: Send + Sync {
    /// Establish a session.
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn SegmentationSession>, SegmentationError>;
}

/// An established connection to a segmentation service.
#[async_trait]
pub trait SegmentationSession: Send + Sync {
    /// Segment an image. Masks are returned in service order.
    async fn segment(
        &self,
        request: &SegmentRequest<'_>,
    ) -> Result<Vec<SegmentedMask>, SegmentationError>;
}

/// Client that always returns the same masks.
///
/// Counts connects and segment calls so callers can check session
/// reuse. Can be configured to fail either step.
#[derive(Debug, Default)]
pub struct StaticSegmentationClient {
    masks: Arc<[SegmentedMask]>,
    connect_error: Option<SegmentationError>,
    segment_error: Option<SegmentationError>,
    connects: AtomicUsize,
    segments: Arc<AtomicUsize>,
}

impl StaticSegmentationClient {
    /// A client serving `masks` on every call.
    #[must_use]
    pub fn new(masks: Vec<SegmentedMask>) -> Self {
        Self {
            masks: masks.into(),
            ..Self::default()
        }
    }

    /// Make every connect attempt fail with `error`.
    #[must_use]
    pub fn failing_connect(mut self, error: SegmentationError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Make every segment call fail with `error`.
    #[must_use]
    pub fn failing_segment(mut self, error: SegmentationError) -> Self {
        self.segment_error = Some(error);
        self
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of segment calls so far, across all sessions.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationClient for StaticSegmentationClient {
    async fn connect(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn SegmentationSession>, SegmentationError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }
        Ok(Box::new(StaticSession {
            masks: Arc::clone(&self.masks),
            error: self.segment_error.clone(),
            calls: Arc::clone(&self.segments),
        }))
    }
}

struct StaticSession {
    masks: Arc<[SegmentedMask]>,
    error: Option<SegmentationError>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SegmentationSession for StaticSession {
    async fn segment(
        &self,
        _request: &SegmentRequest<'_>,
    ) -> Result<Vec<SegmentedMask>, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.masks.to_vec()),
        }
    }
}

//! autolayout-roboflow: a [`SegmentationClient`] backed by a Roboflow
//! workflow.
//!
//! The workflow is called with a base64 JPEG of the source image
//! (shrunk to [`RoboflowConfig::upload_width`]) and the comma-separated
//! prompt split into a list. Each returned prediction becomes a polygon
//! mask framed at the uploaded size.

pub mod error;
pub mod response;
pub mod upload;

use std::time::Duration;

use async_trait::async_trait;
use autolayout_detect::{
    Credentials, SegmentRequest, SegmentationClient, SegmentationError, SegmentationSession,
};
use autolayout_pipeline::SegmentedMask;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use error::RoboflowError;
pub use response::{parse_masks, split_prompts};
pub use upload::{UploadImage, prepare_upload, sent_dimensions};

/// Credential key holding the API key.
pub const API_KEY: &str = "api_key";
/// Credential key holding the workspace slug.
pub const WORKSPACE: &str = "workspace";
/// Credential key holding the workflow id.
pub const WORKFLOW: &str = "workflow";

/// Longest error body kept in [`RoboflowError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoboflowConfig {
    /// Service root; the workflow URL is
    /// `{base_url}/{workspace}/workflows/{workflow}`.
    pub base_url: String,
    /// Maximum width of the uploaded image.
    pub upload_width: u32,
    /// JPEG quality of the uploaded image (1-100).
    pub jpeg_quality: u8,
    /// Whole-request timeout.
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl RoboflowConfig {
    /// Default serverless endpoint.
    pub const DEFAULT_BASE_URL: &str = "https://serverless.roboflow.com";
    /// Default upload width.
    pub const DEFAULT_UPLOAD_WIDTH: u32 = 1024;
    /// Default JPEG quality.
    pub const DEFAULT_JPEG_QUALITY: u8 = 85;
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
}

impl Default for RoboflowConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_owned(),
            upload_width: Self::DEFAULT_UPLOAD_WIDTH,
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Build the workflow URL.
#[must_use]
pub fn workflow_url(base_url: &str, workspace: &str, workflow: &str) -> String {
    format!(
        "{}/{workspace}/workflows/{workflow}",
        base_url.trim_end_matches('/')
    )
}

/// Build the request body for one workflow run.
#[must_use]
pub fn request_body(api_key: &str, image_base64: &str, prompts: &[String]) -> Value {
    json!({
        "api_key": api_key,
        "inputs": {
            "image": { "type": "base64", "value": image_base64 },
            "prompts": prompts,
        }
    })
}

/// Roboflow workflow client.
#[derive(Debug, Clone)]
pub struct RoboflowClient {
    http: reqwest::Client,
    config: RoboflowConfig,
}

impl RoboflowClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`RoboflowError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RoboflowConfig) -> Result<Self, RoboflowError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("autolayout/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// The client configuration.
    #[must_use]
    pub const fn config(&self) -> &RoboflowConfig {
        &self.config
    }
}

#[async_trait]
impl SegmentationClient for RoboflowClient {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn SegmentationSession>, SegmentationError> {
        let require = |key: &'static str| {
            credentials
                .require(key)
                .map(str::to_owned)
                .map_err(|_| RoboflowError::MissingCredential(key))
        };
        let api_key = require(API_KEY)?;
        let workspace = require(WORKSPACE)?;
        let workflow = require(WORKFLOW)?;

        let url = workflow_url(&self.config.base_url, &workspace, &workflow);
        tracing::info!(%url, "Roboflow session ready");

        Ok(Box::new(RoboflowSession {
            http: self.http.clone(),
            config: self.config.clone(),
            url,
            api_key,
        }))
    }
}

/// A configured workflow endpoint.
struct RoboflowSession {
    http: reqwest::Client,
    config: RoboflowConfig,
    url: String,
    api_key: String,
}

impl RoboflowSession {
    async fn run(&self, request: &SegmentRequest<'_>) -> Result<Vec<SegmentedMask>, RoboflowError> {
        let upload = prepare_upload(request.image, self.config.upload_width, self.config.jpeg_quality)?;
        let prompts = split_prompts(request.prompt);
        let body = request_body(&self.api_key, &upload.base64, &prompts);

        tracing::debug!(prompts = ?prompts, "sending workflow request");
        let response = self.http.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            let cut = (0..=text.len().min(MAX_ERROR_BODY))
                .rev()
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(0);
            text.truncate(cut);
            return Err(RoboflowError::Status { status, body: text });
        }

        let body: Value = response.json().await?;
        parse_masks(&body, upload.frame, request.thresholds.confidence)
    }
}

#[async_trait]
impl SegmentationSession for RoboflowSession {
    async fn segment(
        &self,
        request: &SegmentRequest<'_>,
    ) -> Result<Vec<SegmentedMask>, SegmentationError> {
        Ok(self.run(request).await?)
    }
}

use autolayout_detect::SegmentationError;
use reqwest::StatusCode;

/// Errors raised by the Roboflow client.
#[derive(Debug, thiserror::Error)]
pub enum RoboflowError {
    /// A required credential was missing or blank.
    #[error("missing Roboflow credential `{0}`")]
    MissingCredential(&'static str),

    /// The HTTP client could not be built or the request failed in
    /// transport.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Roboflow returned HTTP {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The workflow reported an error in its response body.
    #[error("Roboflow workflow error: {0}")]
    Workflow(String),

    /// The response had no `outputs[0]`.
    #[error("no output data in Roboflow response")]
    MissingOutputs,

    /// The response body did not have the expected shape.
    #[error("unexpected Roboflow response: {0}")]
    Json(#[from] serde_json::Error),

    /// The source image could not be prepared for upload.
    #[error("failed to prepare upload image: {0}")]
    Image(#[from] image::ImageError),
}

impl From<RoboflowError> for SegmentationError {
    fn from(e: RoboflowError) -> Self {
        let message = e.to_string();
        match e {
            RoboflowError::MissingCredential(_) => Self::Unauthorized(message),
            RoboflowError::Status { status, .. }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                Self::Unauthorized(message)
            }
            RoboflowError::Status { status, .. } if status.is_server_error() => {
                Self::Unreachable(message)
            }
            RoboflowError::Http(_) => Self::Unreachable(message),
            RoboflowError::Status { .. }
            | RoboflowError::Workflow(_)
            | RoboflowError::MissingOutputs
            | RoboflowError::Json(_)
            | RoboflowError::Image(_) => Self::MalformedResponse(message),
        }
    }
}

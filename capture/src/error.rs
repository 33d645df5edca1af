//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for the capture pipeline
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors that can occur across the pipeline stages
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestor fatal for camera {camera_id}: {reason}")]
    IngestorFatal { camera_id: u32, reason: String },

    #[error("Transient decode error: {0}")]
    TransientDecode(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Permanent upstream rejection (HTTP {status}): {body}")]
    PermanentUpstream { status: u16, body: String },

    #[error("Queue overflow in {queue}")]
    QueueOverflow { queue: &'static str },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Camera enumeration failed: {0}")]
    CameraEnumeration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl CaptureError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::TransientDecode(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientDecode(_) | Self::TransientNetwork(_) | Self::Http(_)
        )
    }
}

//! Error types for reelcast

use thiserror::Error;

/// Main error type for reelcast operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording is in progress")]
    NotRecording,

    #[error("Invalid frame rate: {0} (must be at least 1 fps)")]
    InvalidFrameRate(u32),

    #[error("Invalid scale factor: {0}")]
    InvalidScaleFactor(f64),

    #[error("Surface is too small to encode: {width}x{height} pixels after alignment")]
    DegenerateGeometry { width: u32, height: u32 },

    #[error("No async runtime available to drive the frame clock")]
    NoRuntime,

    #[error("Surface returned no image")]
    CaptureUnavailable,

    #[error("Output stream error: {0}")]
    OutputStream(String),

    #[error("Failed to create drawing context: {0}")]
    DrawingContext(String),

    #[error("Video encoding error: {0}")]
    EncoderError(String),

    #[error("Recording finished without any written frame")]
    EmptyRecording,

    #[error("Encoder worker is no longer running")]
    WorkerGone,

    #[error("Recording aborted")]
    Aborted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using reelcast's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an output stream error from any displayable cause
    pub fn output_stream(cause: impl std::fmt::Display) -> Self {
        Error::OutputStream(cause.to_string())
    }

    /// Whether this error aborts a recording outright.
    ///
    /// Rejected operations and precondition failures are ordinary results the
    /// caller can act on; everything else means the environment could not
    /// provide a resource the recording depends on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::AlreadyRecording
                | Error::NotRecording
                | Error::InvalidFrameRate(_)
                | Error::InvalidScaleFactor(_)
                | Error::DegenerateGeometry { .. }
                | Error::NoRuntime
                | Error::Config(_)
        )
    }
}

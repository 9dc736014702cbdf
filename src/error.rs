//! Error types for the gaze region tracker.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime inference failed
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or missing configuration (camera parameters, config file)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Landmark template could not be bound to the measured landmarks
    #[error("Calibration error: {0}")]
    CalibrationError(String),

    /// Pose solver could not place the template for one face
    #[error("Pose estimation error: {0}")]
    PoseEstimationError(String),

    /// Head pose was requested before a landmark template was calibrated
    #[error("Face model is not calibrated")]
    NotCalibrated,

    /// Frame acquisition failed or the feed ended
    #[error("Camera read error: {0}")]
    CameraRead(String),

    /// Landmark detector mode exists but has no backing implementation
    #[error("Unsupported landmark detector mode: {0}")]
    UnsupportedDetector(String),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model loading or inference error
    #[error("Model error: {0}")]
    ModelError(String),

    /// Model output processing error
    #[error("Model output error: {0}")]
    ModelOutputError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the run loop may absorb this error and carry on with the next tick
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CalibrationError(_) | Self::PoseEstimationError(_))
    }
}

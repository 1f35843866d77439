use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for Px2XY
#[derive(Error, Debug)]
pub enum Px2XyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid segmentation parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid reference point: {0}")]
    InvalidReference(String),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    JsonOutput(#[from] serde_json::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, Px2XyError>;

/// Why no calibration model could be produced.
///
/// This is an expected state while the user is still picking reference
/// points; calibrated outputs stay blank.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationUnavailable {
    #[error("at least 3 valid reference points are required, {valid} available")]
    InsufficientReferences { valid: usize },

    #[error("reference points are degenerate (coincident or collinear)")]
    Degenerate,
}

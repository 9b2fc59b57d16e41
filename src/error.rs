use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the inspection station.
///
/// Only a missing rule set at startup is fatal; everything else is logged and
/// degrades to a failing rule outcome or a skipped camera.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("configuration error ({}): {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("camera {0} has no enabled folder configuration")]
    CameraNotConfigured(String),

    #[error("rule row {line}: {message}")]
    RuleParse { line: usize, message: String },

    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("detection failed: {0}")]
    Detection(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("cannot open serial port {port}: {message}")]
    SerialConnect { port: String, message: String },

    #[error("serial write failed: {0}")]
    SerialWrite(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StationError {
    pub fn config(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        StationError::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<image::ImageError> for StationError {
    fn from(err: image::ImageError) -> Self {
        StationError::Image(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StationError>;

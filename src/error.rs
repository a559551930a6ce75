// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::time::Duration;

use thiserror::Error;

/// 检测流水线错误
/// Errors surfaced by the detection pipeline.
///
/// "No motion", "no candidates" and "everything filtered out" are normal outcomes
/// and never show up here.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimension { width: u32, height: u32 },

    #[error("inference engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("inference timed out after {0:?}")]
    EngineTimeout(Duration),

    #[error("malformed output tensor {shape:?}: expected a [N, {expected_width}] layout")]
    MalformedTensor {
        shape: Vec<usize>,
        expected_width: usize,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VisionError {
    /// True for failures of the external engine that a fallback backend may absorb.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, VisionError::EngineUnavailable(_))
    }
}

#[cfg(feature = "ort")]
impl From<ort::Error> for VisionError {
    fn from(error: ort::Error) -> Self {
        VisionError::EngineUnavailable(error.to_string())
    }
}

impl From<serde_json::Error> for VisionError {
    fn from(error: serde_json::Error) -> Self {
        VisionError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;

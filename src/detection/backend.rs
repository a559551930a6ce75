// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::fmt;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::types::Proposals;
use crate::error::Result;

/// 检测后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 轮廓/边缘检测, 无需模型
    Classical,
    /// 神经网络推理引擎
    Ml,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Classical => write!(f, "classical"),
            BackendKind::Ml => write!(f, "ml"),
        }
    }
}

/// 统一的检测后端接口
///
/// ```text
/// 原始帧 → propose → Proposals (张量或候选框 + 信箱变换)
///                       ↓
///              Postprocessor (解码/过滤/NMS)
/// ```
///
/// Backends only produce raw proposals; thresholds, NMS and class filtering
/// are applied afterwards, identically for every backend.
pub trait DetectionBackend: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// 类别表, 下标即类别ID
    fn class_names(&self) -> &[String];

    fn propose(&mut self, image: &DynamicImage) -> Result<Proposals>;
}

#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测后端、解码、自校准
pub mod error; // 错误类型
pub mod frame; // 原始帧缓冲
pub mod models; // 推理引擎接口与YOLOv8后端
pub mod motion; // 运动门控
pub mod pipeline; // 单帧编排 + 串行工作线程
pub mod utils; // 信箱变换

pub use crate::config::{Args, PipelineConfig};
pub use crate::detection::{
    BackendKind, ClassicalDetector, ClassicalDetectorConfig, Detection, DetectionBackend,
    Postprocessor, PostprocessorConfig, RawCandidate, SelfCalibrator,
};
pub use crate::error::{Result, VisionError};
pub use crate::frame::PixelLayout;
pub use crate::models::{InferenceEngine, TimedEngine, YOLOv8};
pub use crate::motion::MotionGate;
pub use crate::pipeline::{FrameStage, Pipeline, PipelineOutput, PipelineWorker};
pub use crate::utils::LetterboxTransform;

/// 贪心非极大值抑制 (Greedy non-maximum suppression)
///
/// Boxes are ordered by confidence descending; equal confidences keep their
/// incoming order, so callers pass boxes in original candidate order.
/// With `class_agnostic == false` a box only suppresses boxes of its own class.
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32, class_agnostic: bool) {
    // sort_by 是稳定排序, 同分保持原始下标顺序
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if !class_agnostic && xs[prev_index].id() != xs[index].id() {
                continue;
            }
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// Local timestamp, fields joined by `delimiter`.
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object, corner format
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    /// Corners are reordered so that `xmin <= xmax` and `ymin <= ymax`.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin: x1.min(x2),
            ymin: y1.min(y2),
            xmax: x1.max(x2),
            ymax: y1.max(y2),
            id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmax
    }

    pub fn ymax(&self) -> f32 {
        self.ymax
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax.min(another.xmax);
        let t = self.ymin.max(another.ymin);
        let b = self.ymax.min(another.ymax);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// 0 when both boxes are degenerate.
    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

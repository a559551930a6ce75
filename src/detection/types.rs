// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures shared by the detection backends and the decode stage
use ndarray::{Array, IxDyn};
use serde::{Deserialize, Serialize};

use crate::utils::LetterboxTransform;

// ========== 公共常量 ==========

/// 模型默认输入尺寸
pub const INF_SIZE: u32 = 640;

/// Label of the classical backend when no vehicle refinement is applied.
pub const GENERIC_VEHICLE: &str = "vehicle";

/// 传统检测器的类别表 (Classical backend vocabulary)
pub const CLASSICAL_CLASSES: [&str; 5] = [GENERIC_VEHICLE, "car", "truck", "bicycle", "motorcycle"];

/// 交通相关的COCO类别
pub const TRAFFIC_CLASSES: [&str; 8] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "bus",
    "truck",
    "dog",
    "cat",
];

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Default classes of interest: the traffic subset plus the classical labels.
pub fn default_classes_of_interest() -> Vec<String> {
    let mut classes: Vec<String> = TRAFFIC_CLASSES.iter().map(|s| s.to_string()).collect();
    for name in CLASSICAL_CLASSES {
        if !classes.iter().any(|c| c == name) {
            classes.push(name.to_string());
        }
    }
    classes
}

pub fn class_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ========== 数据结构 ==========

/// 原始候选框 (模型输入坐标系, 中心格式)
#[derive(Clone, Debug, PartialEq)]
pub struct RawCandidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_scores: Vec<f32>,
}

impl RawCandidate {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, class_scores: Vec<f32>) -> Self {
        Self {
            cx,
            cy,
            w,
            h,
            class_scores,
        }
    }

    /// 最高分类别, 同分取最小下标
    /// `None` when there are no scores.
    pub fn best_class(&self) -> Option<(usize, f32)> {
        let (first, rest) = self.class_scores.split_first()?;
        let mut best = (0, *first);
        for (i, &score) in rest.iter().enumerate() {
            if score > best.1 {
                best = (i + 1, score);
            }
        }
        Some(best)
    }
}

/// 后端的原始输出 (Raw output of a detection backend)
#[derive(Clone, Debug)]
pub enum RawOutput {
    /// Score tensor from an inference engine, `[N, 4+C]` or `[4+C, N]`,
    /// optionally with a leading batch axis of 1.
    Tensor(Array<f32, IxDyn>),
    /// Candidates already decoded by the backend.
    Candidates(Vec<RawCandidate>),
}

/// Backend output together with the geometry needed to map it back to the frame.
#[derive(Clone, Debug)]
pub struct Proposals {
    pub output: RawOutput,
    pub transform: LetterboxTransform,
}

impl Proposals {
    pub fn empty(transform: LetterboxTransform) -> Self {
        Self {
            output: RawOutput::Candidates(Vec::new()),
            transform,
        }
    }
}

/// 最终检测结果, 原图整数像素坐标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_ties_resolve_to_lowest_index() {
        let c = RawCandidate::new(0., 0., 1., 1., vec![0.2, 0.7, 0.7, 0.1]);
        assert_eq!(c.best_class(), Some((1, 0.7)));
    }

    #[test]
    fn argmax_of_empty_scores_is_none() {
        let c = RawCandidate::new(0., 0., 1., 1., vec![]);
        assert_eq!(c.best_class(), None);
    }

    #[test]
    fn default_classes_cover_traffic_and_classical_labels() {
        let classes = default_classes_of_interest();
        for name in TRAFFIC_CLASSES.iter().chain(CLASSICAL_CLASSES.iter()) {
            assert!(classes.iter().any(|c| c == name), "missing {name}");
        }
        // no duplicates
        let mut sorted = classes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), classes.len());
    }

    #[test]
    fn coco_vocabulary_indices() {
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[2], "car");
        assert_eq!(COCO_CLASSES[7], "truck");
        assert_eq!(COCO_CLASSES[79], "toothbrush");
    }
}

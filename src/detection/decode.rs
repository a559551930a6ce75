// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 解码 + 置信度过滤 + NMS + 坐标还原
// 模型和传统检测器的候选框都经过这里

use std::collections::HashSet;

use ndarray::{Array, ArrayView2, Axis, Ix2, IxDyn};
use tracing::{debug, trace};

use super::types::{Detection, Proposals, RawCandidate, RawOutput};
use crate::error::{Result, VisionError};
use crate::utils::LetterboxTransform;
use crate::{non_max_suppression, Bbox};

const CXYWH_OFFSET: usize = 4;

/// 后处理配置
#[derive(Debug, Clone)]
pub struct PostprocessorConfig {
    pub iou_threshold: f32,
    pub class_agnostic: bool,
    /// 空集合表示不过滤类别
    pub classes_of_interest: HashSet<String>,
}

impl Default for PostprocessorConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.45,
            class_agnostic: true,
            classes_of_interest: super::types::default_classes_of_interest()
                .into_iter()
                .collect(),
        }
    }
}

/// 后处理器 (DecodeFilterNMS)
pub struct Postprocessor {
    config: PostprocessorConfig,
}

impl Postprocessor {
    pub fn new(config: PostprocessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostprocessorConfig {
        &self.config
    }

    /// Turn backend output into the final detection list.
    ///
    /// `class_names` is the backend vocabulary; its length fixes the expected
    /// tensor width `4 + C`. Output order is NMS keep order.
    pub fn process(
        &self,
        proposals: Proposals,
        class_names: &[String],
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let candidates = match proposals.output {
            RawOutput::Tensor(tensor) => decode_tensor(&tensor, class_names.len())?,
            RawOutput::Candidates(candidates) => candidates,
        };
        let n_candidates = candidates.len();

        let mut boxes = filter_and_map(&candidates, &proposals.transform, threshold);
        let n_confident = boxes.len();

        non_max_suppression(
            &mut boxes,
            self.config.iou_threshold,
            self.config.class_agnostic,
        );
        let n_kept = boxes.len();

        let detections: Vec<Detection> = boxes
            .into_iter()
            .filter_map(|b| {
                let class_name = class_names.get(b.id())?;
                if !self.config.classes_of_interest.is_empty()
                    && !self.config.classes_of_interest.contains(class_name)
                {
                    return None;
                }
                Some(Detection {
                    class_id: b.id(),
                    class_name: class_name.clone(),
                    confidence: b.confidence(),
                    x1: b.xmin() as i32,
                    y1: b.ymin() as i32,
                    x2: b.xmax() as i32,
                    y2: b.ymax() as i32,
                })
            })
            .collect();

        debug!(
            candidates = n_candidates,
            confident = n_confident,
            after_nms = n_kept,
            detections = detections.len(),
            threshold,
            "decode finished"
        );
        Ok(detections)
    }
}

/// 解析原始张量为候选框
///
/// Accepts `[N, 4+C]`, `[4+C, N]` and either of them behind a batch axis of 1.
/// When both axes equal `4+C` the tensor is read as `[N, 4+C]`. Shape is
/// checked before emptiness, so `N = 0` only decodes to nothing when the
/// other axis is `4+C`.
pub fn decode_tensor(
    tensor: &Array<f32, IxDyn>,
    num_classes: usize,
) -> Result<Vec<RawCandidate>> {
    let width = CXYWH_OFFSET + num_classes;
    let malformed = || VisionError::MalformedTensor {
        shape: tensor.shape().to_vec(),
        expected_width: width,
    };

    let view = match tensor.ndim() {
        2 => tensor.view(),
        3 if tensor.shape()[0] == 1 => tensor.index_axis(Axis(0), 0),
        _ => return Err(malformed()),
    };
    let view: ArrayView2<f32> = view.into_dimensionality::<Ix2>().map_err(|_| malformed())?;

    let (rows, cols) = view.dim();
    let view = if cols == width {
        view
    } else if rows == width {
        trace!(rows, cols, "transposing [4+C, N] output");
        view.reversed_axes()
    } else {
        return Err(malformed());
    };

    Ok(view
        .outer_iter()
        .map(|row| {
            RawCandidate::new(
                row[0],
                row[1],
                row[2],
                row[3],
                row.iter().skip(CXYWH_OFFSET).copied().collect(),
            )
        })
        .collect())
}

/// 类别分配 + 置信度过滤 + 中心转角点 + 逆映射
fn filter_and_map(
    candidates: &[RawCandidate],
    transform: &LetterboxTransform,
    threshold: f32,
) -> Vec<Bbox> {
    let mut boxes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some((id, confidence)) = candidate.best_class() else {
            continue;
        };
        if !confidence.is_finite() || confidence < threshold {
            continue;
        }

        let x1 = candidate.cx - candidate.w / 2.;
        let y1 = candidate.cy - candidate.h / 2.;
        let x2 = candidate.cx + candidate.w / 2.;
        let y2 = candidate.cy + candidate.h / 2.;
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            continue;
        }

        let (x1, y1) = transform.inverse_clamped(x1, y1);
        let (x2, y2) = transform.inverse_clamped(x2, y2);
        boxes.push(Bbox::new(x1, y1, x2, y2, id, confidence));
    }
    boxes
}

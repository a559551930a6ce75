// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 性能统计, 画面质量, 交通流量汇总

use std::collections::BTreeMap;

use image::DynamicImage;
use serde::Serialize;

use super::calibrator::CalibrationSample;
use super::types::Detection;

/// 拉普拉斯方差归一化因子
const SHARPNESS_NORMALIZER: f64 = 500.0;

/// 滑动窗口内的性能统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub avg_processing_time: f64,
    pub min_processing_time: f64,
    pub max_processing_time: f64,
    pub avg_confidence: f32,
    pub total_samples: u64,
}

impl PerformanceStats {
    /// Times are in seconds. An empty window yields zeros.
    pub fn from_samples<'a>(
        samples: impl Iterator<Item = &'a CalibrationSample>,
        total_samples: u64,
    ) -> Self {
        let mut n = 0usize;
        let mut time_sum = 0.0;
        let mut time_min = f64::INFINITY;
        let mut time_max = 0.0f64;
        let mut conf_sum = 0.0f32;
        for s in samples {
            let t = s.processing_time.as_secs_f64();
            n += 1;
            time_sum += t;
            time_min = time_min.min(t);
            time_max = time_max.max(t);
            conf_sum += s.confidence;
        }
        if n == 0 {
            return Self {
                total_samples,
                ..Default::default()
            };
        }
        Self {
            avg_processing_time: time_sum / n as f64,
            min_processing_time: time_min,
            max_processing_time: time_max,
            avg_confidence: conf_sum / n as f32,
            total_samples,
        }
    }
}

/// 画面清晰度评分 [0, 1]: 拉普拉斯方差 / 500
pub fn frame_quality(image: &DynamicImage) -> f32 {
    let gray = image.to_luma8();
    if gray.width() < 3 || gray.height() < 3 {
        return 0.0;
    }
    let lap = imageproc::filter::laplacian_filter(&gray);
    let n = (lap.width() as f64) * (lap.height() as f64);
    let mean = lap.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let var = lap
        .pixels()
        .map(|p| {
            let d = p.0[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (var / SHARPNESS_NORMALIZER).min(1.0) as f32
}

/// 交通流量汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrafficSummary {
    pub frames: usize,
    pub total_detections: usize,
    pub detections_per_frame: f64,
    pub class_counts: BTreeMap<String, usize>,
}

impl TrafficSummary {
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a [Detection]>) -> Self {
        let mut summary = Self::default();
        for detections in frames {
            summary.frames += 1;
            summary.total_detections += detections.len();
            for d in detections {
                let counts = &mut summary.class_counts;
                *counts.entry(d.class_name.clone()).or_insert(0) += 1;
            }
        }
        if summary.frames > 0 {
            summary.detections_per_frame = summary.total_detections as f64 / summary.frames as f64;
        }
        summary
    }
}

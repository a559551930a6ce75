// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 自校准: 根据滑动窗口内的平均置信度调整检测阈值

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::stats::PerformanceStats;

/// 平均置信度低于此值时降低阈值
pub const LOW_CONFIDENCE_MEAN: f32 = 0.4;
/// 平均置信度高于此值时提高阈值
pub const HIGH_CONFIDENCE_MEAN: f32 = 0.9;

#[derive(Debug, Clone, Copy)]
pub struct CalibrationSample {
    pub confidence: f32,
    pub processing_time: Duration,
    pub timestamp: Instant,
}

/// 自校准器配置
#[derive(Debug, Clone, Copy)]
pub struct CalibratorConfig {
    pub initial_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
    pub step: f32,
    pub window_size: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 0.5,
            min_threshold: 0.3,
            max_threshold: 0.8,
            step: 0.05,
            window_size: 100,
        }
    }
}

/// 置信度阈值自校准器 (bang-bang controller)
pub struct SelfCalibrator {
    config: CalibratorConfig,
    threshold: f32,
    window: VecDeque<CalibrationSample>,
    total_samples: u64,
}

impl SelfCalibrator {
    /// The initial threshold is clamped into `[min, max]`.
    ///
    /// Inverted bounds are swapped; non-finite bounds fall back to the defaults.
    pub fn new(mut config: CalibratorConfig) -> Self {
        let (min, max) = (config.min_threshold, config.max_threshold);
        if !min.is_finite() || !max.is_finite() {
            let defaults = CalibratorConfig::default();
            warn!(min, max, "non-finite threshold bounds, using defaults");
            config.min_threshold = defaults.min_threshold;
            config.max_threshold = defaults.max_threshold;
        } else if min > max {
            warn!(min, max, "inverted threshold bounds, swapping");
            config.min_threshold = max;
            config.max_threshold = min;
        }
        let threshold = if config.initial_threshold.is_nan() {
            config.min_threshold
        } else {
            config
                .initial_threshold
                .clamp(config.min_threshold, config.max_threshold)
        };
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            threshold,
            total_samples: 0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.config.min_threshold, self.config.max_threshold)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn record_sample(&mut self, confidence: f32, processing_time: Duration) {
        if self.config.window_size == 0 {
            return;
        }
        while self.window.len() >= self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(CalibrationSample {
            confidence,
            processing_time,
            timestamp: Instant::now(),
        });
        self.total_samples += 1;
    }

    pub fn mean_confidence(&self) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        let sum: f32 = self.window.iter().map(|s| s.confidence).sum();
        Some(sum / self.window.len() as f32)
    }

    /// Nudge the threshold by one step; returns the new value.
    ///
    /// An empty window leaves the threshold unchanged.
    pub fn recalibrate(&mut self) -> f32 {
        let Some(mean) = self.mean_confidence() else {
            return self.threshold;
        };

        let previous = self.threshold;
        let step = self.config.step;
        if mean < LOW_CONFIDENCE_MEAN {
            self.threshold = (previous - step).max(self.config.min_threshold);
        } else if mean > HIGH_CONFIDENCE_MEAN {
            self.threshold = (previous + step).min(self.config.max_threshold);
        }

        if self.threshold != previous {
            info!(
                mean_confidence = mean,
                from = previous,
                to = self.threshold,
                "confidence threshold recalibrated"
            );
        }
        self.threshold
    }

    /// Statistics over the current window; `total` counts every sample ever recorded.
    pub fn stats(&self) -> PerformanceStats {
        PerformanceStats::from_samples(self.window.iter(), self.total_samples)
    }
}

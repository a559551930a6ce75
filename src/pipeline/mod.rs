// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测流水线 (Detection Pipeline)
///
/// 单帧状态机:
/// RECEIVED → MOTION_CHECKED → {SKIPPED | DETECTED → FILTERED} → DONE
///
/// - MotionGate:    运动门控 (可关闭)
/// - Backend:       传统检测器或 YOLOv8 + 推理引擎
/// - Postprocessor: 解码/过滤/NMS, 所有后端共用
/// - Calibrator:    每 N 次调用调整一次置信度阈值
pub mod worker;

pub use worker::{FrameJob, FrameResult, PipelineWorker};

use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::detection::stats::{frame_quality, PerformanceStats};
use crate::detection::{
    BackendKind, ClassicalDetector, Detection, DetectionBackend, Postprocessor, SelfCalibrator,
};
use crate::error::{Result, VisionError};
use crate::frame::check_dimensions;
use crate::models::{InferenceEngine, TimedEngine, YOLOv8};
use crate::motion::MotionGate;

/// 单帧处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStage {
    Received,
    MotionChecked,
    Skipped,
    Detected,
    Filtered,
    Done,
}

/// 单帧输出
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub detections: Vec<Detection>,
    /// 变化像素百分比 [0, 100]
    pub motion_fraction: f32,
    pub skipped: bool,
    pub elapsed_seconds: f64,
    pub threshold_used: f32,
    /// 只有进入检测的帧才计算
    pub frame_quality: Option<f32>,
    /// 实际产生候选框的后端
    pub backend: Option<String>,
    pub stages: Vec<FrameStage>,
}

pub struct Pipeline {
    config: PipelineConfig,
    motion: MotionGate,
    backend: Box<dyn DetectionBackend>,
    fallback: Option<ClassicalDetector>,
    postprocessor: Postprocessor,
    calibrator: SelfCalibrator,
    invocations: u64,
}

impl Pipeline {
    /// Build around an already constructed backend.
    pub fn new(config: PipelineConfig, backend: Box<dyn DetectionBackend>) -> Result<Self> {
        config.validate()?;
        let fallback = (backend.kind() == BackendKind::Ml && config.allow_classical_fallback)
            .then(|| ClassicalDetector::new(config.classical.clone()));
        info!(
            backend = backend.name(),
            kind = %backend.kind(),
            fallback = fallback.is_some(),
            gating = config.motion_gating_enabled,
            "pipeline ready"
        );
        Ok(Self {
            motion: MotionGate::new(config.motion_config()),
            postprocessor: Postprocessor::new(config.postprocessor_config()),
            calibrator: SelfCalibrator::new(config.calibrator_config()),
            backend,
            fallback,
            config,
            invocations: 0,
        })
    }

    /// Pick the backend named by `config.detection_backend`.
    ///
    /// The ml backend needs `engine`; without one the classical detector is
    /// used when fallback is allowed.
    pub fn from_config(
        config: PipelineConfig,
        engine: Option<Box<dyn InferenceEngine>>,
    ) -> Result<Self> {
        config.validate()?;
        let backend: Box<dyn DetectionBackend> = match (config.detection_backend, engine) {
            (BackendKind::Ml, Some(engine)) => {
                let engine: Box<dyn InferenceEngine> = match config.inference_timeout() {
                    Some(timeout) => Box::new(TimedEngine::new(engine, timeout)?),
                    None => engine,
                };
                let model = YOLOv8::new(engine, config.model_input_size)?;
                model.summary();
                Box::new(model)
            }
            (BackendKind::Ml, None) if config.allow_classical_fallback => {
                warn!("no inference engine available, using the classical detector");
                Box::new(ClassicalDetector::new(config.classical.clone()))
            }
            (BackendKind::Ml, None) => {
                return Err(VisionError::EngineUnavailable(
                    "ml backend selected but no inference engine was provided".to_string(),
                ));
            }
            (BackendKind::Classical, _) => {
                Box::new(ClassicalDetector::new(config.classical.clone()))
            }
        };
        Self::new(config, backend)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn threshold(&self) -> f32 {
        self.calibrator.threshold()
    }

    pub fn calibrator(&self) -> &SelfCalibrator {
        &self.calibrator
    }

    pub fn stats(&self) -> PerformanceStats {
        self.calibrator.stats()
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Run one frame through the pipeline.
    ///
    /// Zero-sized frames, engine failures without fallback and malformed
    /// engine output are returned as errors. No motion, no candidates and an
    /// engine timeout all yield an empty detection list.
    pub fn process(&mut self, image: &DynamicImage) -> Result<PipelineOutput> {
        let start = Instant::now();
        let mut stages = vec![FrameStage::Received];
        check_dimensions(image)?;
        self.invocations += 1;

        let (has_motion, motion_fraction) = self.motion.evaluate(image);
        stages.push(FrameStage::MotionChecked);
        let threshold = self.calibrator.threshold();

        if self.config.motion_gating_enabled && !has_motion {
            trace!(motion_fraction, "frame skipped");
            stages.push(FrameStage::Skipped);
            self.maybe_recalibrate();
            stages.push(FrameStage::Done);
            return Ok(PipelineOutput {
                detections: Vec::new(),
                motion_fraction,
                skipped: true,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                threshold_used: threshold,
                frame_quality: None,
                backend: None,
                stages,
            });
        }

        stages.push(FrameStage::Detected);
        let quality = frame_quality(image);
        let (detections, backend) = match self.backend.propose(image) {
            Ok(proposals) => {
                let names = self.backend.class_names();
                let detections = self.postprocessor.process(proposals, names, threshold)?;
                (detections, self.backend.name().to_string())
            }
            Err(VisionError::EngineTimeout(timeout)) => {
                warn!(?timeout, "inference deadline missed, frame has no candidates");
                (Vec::new(), self.backend.name().to_string())
            }
            Err(e) if e.is_engine_failure() => match self.fallback.as_mut() {
                Some(fallback) => {
                    warn!(error = %e, "engine failed, falling back to the classical detector");
                    let proposals = fallback.propose(image)?;
                    let names = fallback.class_names();
                    let detections = self.postprocessor.process(proposals, names, threshold)?;
                    (detections, fallback.name().to_string())
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        };
        stages.push(FrameStage::Filtered);

        let elapsed = start.elapsed();
        self.record(&detections, elapsed);
        self.maybe_recalibrate();
        stages.push(FrameStage::Done);

        debug!(
            detections = detections.len(),
            motion_fraction,
            threshold,
            backend = %backend,
            elapsed = ?elapsed,
            "frame processed"
        );
        Ok(PipelineOutput {
            detections,
            motion_fraction,
            skipped: false,
            elapsed_seconds: elapsed.as_secs_f64(),
            threshold_used: threshold,
            frame_quality: Some(quality),
            backend: Some(backend),
            stages,
        })
    }

    /// 只记录有检测结果的帧: 平均置信度 + 耗时
    fn record(&mut self, detections: &[Detection], elapsed: Duration) {
        if detections.is_empty() {
            return;
        }
        let mean = detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32;
        self.calibrator.record_sample(mean, elapsed);
    }

    fn maybe_recalibrate(&mut self) {
        let interval = self.config.recalibration_interval;
        if interval > 0 && self.invocations % interval == 0 {
            self.calibrator.recalibrate();
        }
    }
}

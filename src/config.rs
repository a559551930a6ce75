// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 配置 (Configuration)
///
/// - `Args`:           命令行参数 (clap)
/// - `PipelineConfig`: JSON 配置文件 (serde), 缺省字段取默认值
///
/// 命令行参数覆盖配置文件
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::calibrator::CalibratorConfig;
use crate::detection::types::{default_classes_of_interest, INF_SIZE};
use crate::detection::{BackendKind, ClassicalDetectorConfig, PostprocessorConfig};
use crate::error::{Result, VisionError};
use crate::motion::MotionConfig;

/// 运动门控检测
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "运动门控边缘检测", long_about = None)]
pub struct Args {
    /// 输入图片 (按顺序作为连续帧处理)
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// JSON 配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 把最终生效的配置写到此路径
    #[arg(long)]
    pub save_config: Option<PathBuf>,

    /// 检测后端
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// ONNX 模型路径 (ml 后端)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// 设备ID
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 初始置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IoU 阈值
    #[arg(long)]
    pub iou: Option<f32>,

    /// 运动阈值 (变化像素百分比)
    #[arg(long)]
    pub motion_threshold: Option<f32>,

    /// 每帧都检测, 不做运动门控
    #[arg(long)]
    pub no_motion_gate: bool,

    /// 按类别分别做 NMS
    #[arg(long)]
    pub per_class_nms: bool,

    /// 推理超时 (毫秒)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// 流水线配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 自校准阈值范围 (min, max)
    pub confidence_threshold_bounds: (f32, f32),
    pub initial_confidence_threshold: f32,

    // 运动门控
    pub motion_threshold_percent: f32,
    pub motion_noise_floor: u8,
    pub motion_blur_sigma: f32,
    pub motion_gating_enabled: bool,

    // 后处理
    pub nms_iou_threshold: f32,
    pub class_agnostic_nms: bool,
    /// 空列表表示保留所有类别
    pub classes_of_interest: Vec<String>,

    // 后端
    pub detection_backend: BackendKind,
    pub model_input_size: u32,
    pub allow_classical_fallback: bool,
    pub inference_timeout_ms: Option<u64>,

    // 自校准
    pub calibration_window_size: usize,
    pub calibration_step: f32,
    /// 每 N 次调用重新校准, 0 表示关闭
    pub recalibration_interval: u64,

    pub classical: ClassicalDetectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold_bounds: (0.3, 0.8),
            initial_confidence_threshold: 0.5,
            motion_threshold_percent: 3.0,
            motion_noise_floor: 25,
            motion_blur_sigma: 2.0,
            motion_gating_enabled: true,
            nms_iou_threshold: 0.45,
            class_agnostic_nms: true,
            classes_of_interest: default_classes_of_interest(),
            detection_backend: BackendKind::Classical,
            model_input_size: INF_SIZE,
            allow_classical_fallback: true,
            inference_timeout_ms: None,
            calibration_window_size: 100,
            calibration_step: 0.05,
            recalibration_interval: 50,
            classical: ClassicalDetectorConfig::default(),
        }
    }
}

fn unit_interval(name: &str, v: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&v) {
        return Err(VisionError::Config(format!("{name} must be in [0, 1], got {v}")));
    }
    Ok(())
}

fn positive(name: &str, v: f32) -> Result<()> {
    if !(v > 0.0) {
        return Err(VisionError::Config(format!("{name} must be positive, got {v}")));
    }
    Ok(())
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.confidence_threshold_bounds;
        unit_interval("confidence_threshold_bounds.min", min)?;
        unit_interval("confidence_threshold_bounds.max", max)?;
        if min > max {
            return Err(VisionError::Config(format!(
                "confidence_threshold_bounds inverted: ({min}, {max})"
            )));
        }
        let initial = self.initial_confidence_threshold;
        unit_interval("initial_confidence_threshold", initial)?;
        unit_interval("nms_iou_threshold", self.nms_iou_threshold)?;

        if !(0.0..=100.0).contains(&self.motion_threshold_percent) {
            return Err(VisionError::Config(format!(
                "motion_threshold_percent must be in [0, 100], got {}",
                self.motion_threshold_percent
            )));
        }
        positive("motion_blur_sigma", self.motion_blur_sigma)?;
        positive("calibration_step", self.calibration_step)?;

        if self.model_input_size == 0 {
            return Err(VisionError::Config("model_input_size must be positive".to_string()));
        }
        if self.calibration_window_size == 0 {
            return Err(VisionError::Config(
                "calibration_window_size must be positive".to_string(),
            ));
        }
        if self.inference_timeout_ms == Some(0) {
            return Err(VisionError::Config(
                "inference_timeout_ms must be positive".to_string(),
            ));
        }

        let c = &self.classical;
        positive("classical.blur_sigma", c.blur_sigma)?;
        if !(c.min_area >= 0.0) {
            return Err(VisionError::Config(format!(
                "classical.min_area must be non-negative, got {}",
                c.min_area
            )));
        }
        if !(c.canny_low >= 0.0 && c.canny_low <= c.canny_high) {
            return Err(VisionError::Config(format!(
                "classical canny thresholds must satisfy 0 <= low <= high, got ({}, {})",
                c.canny_low, c.canny_high
            )));
        }
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(backend) = args.backend {
            self.detection_backend = backend;
        } else if args.model.is_some() {
            self.detection_backend = BackendKind::Ml;
        }
        if let Some(conf) = args.conf {
            self.initial_confidence_threshold = conf;
        }
        if let Some(iou) = args.iou {
            self.nms_iou_threshold = iou;
        }
        if let Some(motion) = args.motion_threshold {
            self.motion_threshold_percent = motion;
        }
        if args.no_motion_gate {
            self.motion_gating_enabled = false;
        }
        if args.per_class_nms {
            self.class_agnostic_nms = false;
        }
        if let Some(ms) = args.timeout_ms {
            self.inference_timeout_ms = Some(ms);
        }
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }

    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            threshold_percent: self.motion_threshold_percent,
            noise_floor: self.motion_noise_floor,
            blur_sigma: self.motion_blur_sigma,
        }
    }

    pub fn calibrator_config(&self) -> CalibratorConfig {
        CalibratorConfig {
            initial_threshold: self.initial_confidence_threshold,
            min_threshold: self.confidence_threshold_bounds.0,
            max_threshold: self.confidence_threshold_bounds.1,
            step: self.calibration_step,
            window_size: self.calibration_window_size,
        }
    }

    pub fn postprocessor_config(&self) -> PostprocessorConfig {
        PostprocessorConfig {
            iou_threshold: self.nms_iou_threshold,
            class_agnostic: self.class_agnostic_nms,
            classes_of_interest: self.classes_of_interest.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = PipelineConfig::default();
        c.validate().unwrap();
        assert_eq!(c.confidence_threshold_bounds, (0.3, 0.8));
        assert_eq!(c.model_input_size, 640);
        assert!(c.classes_of_interest.iter().any(|s| s == "vehicle"));
    }

    #[test]
    fn save_then_load_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut c = PipelineConfig::default();
        c.detection_backend = BackendKind::Ml;
        c.inference_timeout_ms = Some(250);
        c.classical.refine_vehicle_type = true;
        c.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), c);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(
            &path,
            r#"{ "detection_backend": "ml", "classical": { "min_area": 500.0 } }"#,
        )
        .unwrap();
        let c = PipelineConfig::load(&path).unwrap();
        assert_eq!(c.detection_backend, BackendKind::Ml);
        assert_eq!(c.classical.min_area, 500.0);
        assert_eq!(c.classical.canny_high, 150.0);
        assert_eq!(c.nms_iou_threshold, 0.45);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PipelineConfig::load(dir.path().join("absent.json")),
            Err(VisionError::Io(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(VisionError::Config(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases: Vec<Box<dyn Fn(&mut PipelineConfig)>> = vec![
            Box::new(|c| c.confidence_threshold_bounds = (0.8, 0.3)),
            Box::new(|c| c.confidence_threshold_bounds = (-0.1, 0.8)),
            Box::new(|c| c.nms_iou_threshold = 1.5),
            Box::new(|c| c.motion_threshold_percent = 120.0),
            Box::new(|c| c.motion_blur_sigma = 0.0),
            Box::new(|c| c.model_input_size = 0),
            Box::new(|c| c.calibration_window_size = 0),
            Box::new(|c| c.calibration_step = f32::NAN),
            Box::new(|c| c.inference_timeout_ms = Some(0)),
            Box::new(|c| c.classical.blur_sigma = -1.0),
            Box::new(|c| {
                c.classical.canny_low = 200.0;
                c.classical.canny_high = 100.0;
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut c = PipelineConfig::default();
            mutate(&mut c);
            assert!(
                matches!(c.validate(), Err(VisionError::Config(_))),
                "case {i} accepted"
            );
        }
    }

    #[test]
    fn cli_flags_override_the_file() {
        let args = Args::parse_from([
            "observer",
            "--conf",
            "0.35",
            "--iou",
            "0.6",
            "--no-motion-gate",
            "--per-class-nms",
            "--model",
            "yolov8n.onnx",
            "--timeout-ms",
            "80",
            "frame.jpg",
        ]);
        let mut c = PipelineConfig::default();
        c.apply_args(&args);
        assert_eq!(c.initial_confidence_threshold, 0.35);
        assert_eq!(c.nms_iou_threshold, 0.6);
        assert!(!c.motion_gating_enabled);
        assert!(!c.class_agnostic_nms);
        assert_eq!(c.detection_backend, BackendKind::Ml);
        assert_eq!(c.inference_timeout(), Some(Duration::from_millis(80)));
        assert_eq!(args.images, vec![PathBuf::from("frame.jpg")]);
    }

    #[test]
    fn explicit_backend_wins_over_model_flag() {
        let args = Args::parse_from([
            "observer",
            "--backend",
            "classical",
            "--model",
            "m.onnx",
            "a.png",
        ]);
        let mut c = PipelineConfig {
            detection_backend: BackendKind::Ml,
            ..Default::default()
        };
        c.apply_args(&args);
        assert_eq!(c.detection_backend, BackendKind::Classical);
    }
}

/// 检测系统 (Detection System)
///
/// - Backend:    检测后端接口 (传统轮廓 / 神经网络)
/// - Classical:  轮廓检测器
/// - Decode:     解码 + 置信度过滤 + NMS + 坐标还原
/// - Calibrator: 置信度阈值自校准
/// - Stats:      性能统计与流量汇总
pub mod backend;
pub mod calibrator;
pub mod classical;
pub mod decode;
pub mod stats;
pub mod types;

pub use backend::{BackendKind, DetectionBackend};
pub use calibrator::{CalibratorConfig, SelfCalibrator};
pub use classical::{ClassicalDetector, ClassicalDetectorConfig};
pub use decode::{decode_tensor, Postprocessor, PostprocessorConfig};
pub use stats::{frame_quality, PerformanceStats, TrafficSummary};
pub use types::{Detection, Proposals, RawCandidate, RawOutput};

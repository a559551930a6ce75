/// 推理引擎接口与模型后端
///
/// # 架构说明
///
/// ## 推理引擎 (InferenceEngine)
/// - 外部推理引擎的最小契约: `[1, 3, S, S]` 张量 → 原始输出张量
/// - 不做任何解码, 输出交给 `detection::Postprocessor`
/// - 实现: `OrtEngine` (ONNX Runtime, 需 `ort` feature), 测试中的假引擎
///
/// ## 模型后端 (YOLOv8)
/// - 信箱预处理 (preprocess) + 引擎推理 (run)
/// - 实现 `DetectionBackend`, 与传统检测器共用后处理
///
/// ## 超时包装 (TimedEngine)
/// - 引擎在独立线程运行, 超时返回 `EngineTimeout`
///
/// ## 使用示例
/// ```ignore
/// use edge_observer::models::{OrtEngine, TimedEngine, YOLOv8};
///
/// let engine = OrtEngine::load("yolov8n.onnx", OrtEP::CPU)?;
/// let engine = TimedEngine::new(Box::new(engine), Duration::from_millis(200))?;
/// let model = YOLOv8::new(Box::new(engine), 640)?;
/// ```
use ndarray::{Array, IxDyn};

use crate::error::Result;

/// 外部推理引擎
pub trait InferenceEngine: Send {
    fn name(&self) -> &str;

    /// 推理: NCHW 输入 → 原始输出 (未解码)
    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>>;

    /// 模型自带的类别表 (如果有)
    fn class_names(&self) -> Option<Vec<String>> {
        None
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
        (**self).run(input)
    }

    fn class_names(&self) -> Option<Vec<String>> {
        (**self).class_names()
    }
}

#[cfg(feature = "ort")]
pub mod ort_engine; // ONNX Runtime 引擎
pub mod timed; // 超时包装
pub mod yolov8; // YOLOv8 后端: 预处理 + 推理

// Re-exports
#[cfg(feature = "ort")]
pub use ort_engine::{OrtEP, OrtEngine};
pub use timed::TimedEngine;
pub use yolov8::YOLOv8;

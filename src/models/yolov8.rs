// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测后端
// 包含: 信箱预处理、引擎推理; 解码由 detection::Postprocessor 完成

use image::DynamicImage;
use ndarray::{Array, IxDyn};
use tracing::{debug, info};

use super::InferenceEngine;
use crate::detection::types::{class_names, Proposals, RawOutput, COCO_CLASSES};
use crate::detection::{BackendKind, DetectionBackend};
use crate::error::{Result, VisionError};
use crate::frame::check_dimensions;
use crate::utils::{letterbox_image, LetterboxTransform};

pub struct YOLOv8 {
    engine: Box<dyn InferenceEngine>,
    input_size: u32,
    names: Vec<String>,
}

impl YOLOv8 {
    /// Class names come from the engine when it reports them, COCO otherwise.
    pub fn new(engine: Box<dyn InferenceEngine>, input_size: u32) -> Result<Self> {
        if input_size == 0 {
            return Err(VisionError::Config(
                "model input size must be positive".to_string(),
            ));
        }
        let names = engine
            .class_names()
            .unwrap_or_else(|| class_names(&COCO_CLASSES));
        Ok(Self {
            engine,
            input_size,
            names,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn nc(&self) -> usize {
        self.names.len()
    }

    /// 信箱缩放 + NCHW + 归一化到 [0, 1]
    pub fn preprocess(&self, x: &DynamicImage) -> Result<(Array<f32, IxDyn>, LetterboxTransform)> {
        check_dimensions(x)?;
        let transform = LetterboxTransform::compute(x.width(), x.height(), self.input_size)?;
        let canvas = letterbox_image(x, &transform)?;

        let size = self.input_size as usize;
        let mut ys = Array::zeros((1, 3, size, size)).into_dyn();
        for (x, y, rgb) in canvas.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b] = rgb.0;
            ys[[0, 0, y, x]] = (r as f32) / 255.0;
            ys[[0, 1, y, x]] = (g as f32) / 255.0;
            ys[[0, 2, y, x]] = (b as f32) / 255.0;
        }
        Ok((ys, transform))
    }

    pub fn summary(&self) {
        info!(
            engine = self.engine.name(),
            input_size = self.input_size,
            classes = self.nc(),
            "YOLOv8 backend ready"
        );
    }
}

impl DetectionBackend for YOLOv8 {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ml
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn propose(&mut self, image: &DynamicImage) -> Result<Proposals> {
        let t_pre = std::time::Instant::now();
        let (xs, transform) = self.preprocess(image)?;
        let pre = t_pre.elapsed();

        let t_run = std::time::Instant::now();
        let ys = self.engine.run(xs)?;
        debug!(
            preprocess = ?pre,
            inference = ?t_run.elapsed(),
            output_shape = ?ys.shape(),
            "YOLOv8 forward"
        );

        Ok(Proposals {
            output: RawOutput::Tensor(ys),
            transform,
        })
    }
}

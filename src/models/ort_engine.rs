// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理引擎

use std::path::Path;

use ndarray::{Array, IxDyn};
use ort::execution_providers as ep;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::InferenceEngine;
use crate::error::{Result, VisionError};

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

pub struct OrtEngine {
    session: Session,
    name: String,
    input_name: String,
    output_name: String,
}

impl OrtEngine {
    pub fn load<P: AsRef<Path>>(model_path: P, ep: OrtEP) -> Result<Self> {
        let path = model_path.as_ref();
        let builder = Session::builder()?;
        let builder = match ep {
            OrtEP::CPU => builder,
            OrtEP::CUDA(device_id) => builder.with_execution_providers([
                ep::CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])?,
            OrtEP::Trt(device_id) => builder.with_execution_providers([
                ep::TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                ep::CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])?,
        };
        let session = builder.commit_from_file(path)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| VisionError::EngineUnavailable("model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| VisionError::EngineUnavailable("model has no outputs".to_string()))?;

        info!(
            model = %path.display(),
            ?ep,
            input = %input_name,
            output = %output_name,
            "ONNX Runtime session ready"
        );

        Ok(Self {
            session,
            name: format!("ort:{}", path.display()),
            input_name,
            output_name,
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
        let shape: [usize; 4] = match input.shape() {
            &[n, c, h, w] => [n, c, h, w],
            other => {
                return Err(VisionError::EngineUnavailable(format!(
                    "expected NCHW input, got {other:?}"
                )));
            }
        };
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let output = &outputs[self.output_name.as_str()];
        let (dims, data) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();

        Array::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| {
            VisionError::MalformedTensor {
                shape: dims.clone(),
                expected_width: 0,
            }
        })
    }
}

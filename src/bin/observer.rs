// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 边缘观测器 (Edge Observer)
///
/// 逐帧处理图像序列: 运动门控 → 检测 → 后处理 → 阈值自校准
/// 每帧输出一行 JSON, 结束时输出流量汇总与性能统计
use anyhow::{bail, Context, Result};
use clap::Parser;
use edge_observer::detection::TrafficSummary;
use edge_observer::models::InferenceEngine;
use edge_observer::{gen_time_string, Args, BackendKind, Detection, Pipeline, PipelineConfig};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_args(&args);
    config.validate().context("invalid configuration")?;

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("saving config {}", path.display()))?;
    }

    let engine = build_engine(&args, &config)?;
    let mut pipeline = Pipeline::from_config(config, engine)?;
    let images = args.images.len();
    info!(backend = pipeline.backend_name(), images, "start");

    let mut frames: Vec<Vec<Detection>> = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                error!(image = %path.display(), error = %e, "cannot read image");
                continue;
            }
        };
        let output = pipeline
            .process(&image)
            .with_context(|| format!("processing {}", path.display()))?;
        println!(
            "{}",
            json!({
                "timestamp": gen_time_string("-"),
                "image": path.display().to_string(),
                "output": &output,
            })
        );
        frames.push(output.detections);
    }

    let summary = TrafficSummary::from_frames(frames.iter().map(Vec::as_slice));
    println!(
        "{}",
        json!({
            "summary": summary,
            "threshold": pipeline.threshold(),
            "performance": pipeline.stats(),
        })
    );
    Ok(())
}

#[cfg(feature = "ort")]
fn build_engine(args: &Args, config: &PipelineConfig) -> Result<Option<Box<dyn InferenceEngine>>> {
    use edge_observer::models::{OrtEP, OrtEngine};

    if config.detection_backend != BackendKind::Ml {
        return Ok(None);
    }
    let Some(model) = &args.model else {
        if config.allow_classical_fallback {
            warn!("--model not given");
            return Ok(None);
        }
        bail!("the ml backend needs --model");
    };
    let ep = if args.trt {
        OrtEP::Trt(args.device_id)
    } else if args.cuda {
        OrtEP::CUDA(args.device_id)
    } else {
        OrtEP::CPU
    };
    match OrtEngine::load(model, ep) {
        Ok(engine) => Ok(Some(Box::new(engine))),
        Err(e) if config.allow_classical_fallback => {
            warn!(error = %e, "model failed to load");
            Ok(None)
        }
        Err(e) => {
            let context = format!("loading model {}", model.display());
            Err(e).context(context)
        }
    }
}

#[cfg(not(feature = "ort"))]
fn build_engine(_args: &Args, config: &PipelineConfig) -> Result<Option<Box<dyn InferenceEngine>>> {
    if config.detection_backend == BackendKind::Ml && !config.allow_classical_fallback {
        bail!("built without the `ort` feature, the ml backend is unavailable");
    }
    if config.detection_backend == BackendKind::Ml {
        warn!("built without the `ort` feature");
    }
    Ok(None)
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 串行检测线程: 有界帧队列, 满则丢帧, 结果按提交顺序返回
// 结果队列同样有界, 调用方不取时丢弃最旧的结果

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::DynamicImage;
use tracing::{debug, info, warn};

use super::{Pipeline, PipelineOutput};
use crate::error::{Result, VisionError};

pub struct FrameJob {
    pub frame_id: u64,
    pub image: DynamicImage,
}

pub struct FrameResult {
    pub frame_id: u64,
    pub output: Result<PipelineOutput>,
}

pub struct PipelineWorker {
    frames: Sender<FrameJob>,
    results: Receiver<FrameResult>,
    handle: JoinHandle<Pipeline>,
    submitted: u64,
    dropped: u64,
}

impl PipelineWorker {
    /// Move `pipeline` onto a worker thread that takes frames from a queue
    /// holding at most `capacity` pending frames.
    ///
    /// At most `result_capacity` results wait to be received; beyond that the
    /// oldest unread result is discarded.
    pub fn spawn(pipeline: Pipeline, capacity: usize, result_capacity: usize) -> Result<Self> {
        let (frames, frame_rx) = bounded::<FrameJob>(capacity.max(1));
        let (result_tx, results) = bounded::<FrameResult>(result_capacity.max(1));
        let backlog = results.clone();

        let handle = thread::Builder::new()
            .name("detection".to_string())
            .spawn(move || run(pipeline, frame_rx, result_tx, backlog))?;

        Ok(Self {
            frames,
            results,
            handle,
            submitted: 0,
            dropped: 0,
        })
    }

    /// 非阻塞提交; 队列满时丢弃该帧并返回 false
    pub fn submit(&mut self, frame_id: u64, image: DynamicImage) -> bool {
        match self.frames.try_send(FrameJob { frame_id, image }) {
            Ok(()) => {
                self.submitted += 1;
                true
            }
            Err(TrySendError::Full(job)) => {
                self.dropped += 1;
                debug!(
                    frame_id = job.frame_id,
                    dropped = self.dropped,
                    "queue full, frame dropped"
                );
                false
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!(frame_id = job.frame_id, "detection thread gone, frame dropped");
                self.dropped += 1;
                false
            }
        }
    }

    pub fn results(&self) -> &Receiver<FrameResult> {
        &self.results
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the queue, wait for pending frames and hand the pipeline back
    /// together with every result not yet received.
    pub fn finish(self) -> Result<(Pipeline, Vec<FrameResult>)> {
        let Self {
            frames,
            results,
            handle,
            submitted,
            dropped,
        } = self;
        drop(frames);
        let pipeline = handle.join().map_err(|_| {
            VisionError::EngineUnavailable("detection thread panicked".to_string())
        })?;
        let rest: Vec<FrameResult> = results.try_iter().collect();
        info!(submitted, dropped, "detection thread stopped");
        Ok((pipeline, rest))
    }
}

fn run(
    mut pipeline: Pipeline,
    frames: Receiver<FrameJob>,
    results: Sender<FrameResult>,
    backlog: Receiver<FrameResult>,
) -> Pipeline {
    debug!(backend = pipeline.backend_name(), "detection thread started");
    for job in frames.iter() {
        let output = pipeline.process(&job.image);
        if let Err(e) = &output {
            warn!(frame_id = job.frame_id, error = %e, "frame failed");
        }
        let mut result = FrameResult {
            frame_id: job.frame_id,
            output,
        };
        // 结果队列满时丢弃最旧的结果
        loop {
            match results.try_send(result) {
                Ok(()) => break,
                Err(TrySendError::Full(r)) => {
                    if let Ok(old) = backlog.try_recv() {
                        debug!(frame_id = old.frame_id, "result backlog full, oldest dropped");
                    }
                    result = r;
                }
                Err(TrySendError::Disconnected(_)) => return pipeline,
            }
        }
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detection::types::{class_names, Proposals, CLASSICAL_CLASSES};
    use crate::detection::{BackendKind, DetectionBackend};
    use crate::utils::LetterboxTransform;
    use crossbeam_channel::unbounded;
    use image::RgbImage;

    /// 每次 propose 先通知开始, 再等待放行
    struct GatedBackend {
        names: Vec<String>,
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl DetectionBackend for GatedBackend {
        fn name(&self) -> &str {
            "gated"
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Classical
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }

        fn propose(&mut self, image: &DynamicImage) -> Result<Proposals> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            let transform = LetterboxTransform::identity(image.width(), image.height())?;
            Ok(Proposals::empty(transform))
        }
    }

    fn gated_pipeline() -> (Pipeline, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let backend = GatedBackend {
            names: class_names(&CLASSICAL_CLASSES),
            started: started_tx,
            release: release_rx,
        };
        let config = PipelineConfig {
            motion_gating_enabled: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, Box::new(backend)).unwrap();
        (pipeline, started_rx, release_tx)
    }

    fn frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(64, 48))
    }

    #[test]
    fn full_queue_drops_frames() {
        let (pipeline, started, release) = gated_pipeline();
        let mut worker = PipelineWorker::spawn(pipeline, 1, 4).unwrap();

        assert!(worker.submit(1, frame()));
        // 等待线程取走第一帧
        started.recv().unwrap();
        assert!(worker.submit(2, frame()));
        assert!(!worker.submit(3, frame()));
        assert_eq!(worker.dropped(), 1);

        release.send(()).unwrap();
        release.send(()).unwrap();
        let (pipeline, results) = worker.finish().unwrap();

        let ids: Vec<u64> = results.iter().map(|r| r.frame_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(results.iter().all(|r| r.output.is_ok()));
        assert_eq!(pipeline.invocations(), 2);
    }

    #[test]
    fn undrained_results_keep_only_the_newest() {
        let (pipeline, started, release) = gated_pipeline();
        let mut worker = PipelineWorker::spawn(pipeline, 4, 1).unwrap();

        for id in 1..=3 {
            assert!(worker.submit(id, frame()));
        }
        for _ in 0..3 {
            release.send(()).unwrap();
        }
        for _ in 0..3 {
            started.recv().unwrap();
        }
        let (pipeline, rest) = worker.finish().unwrap();

        let ids: Vec<u64> = rest.iter().map(|r| r.frame_id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(pipeline.invocations(), 3);
    }

    #[test]
    fn errors_are_reported_per_frame() {
        let config = PipelineConfig::default();
        let pipeline = Pipeline::from_config(config, None).unwrap();
        let mut worker = PipelineWorker::spawn(pipeline, 4, 4).unwrap();

        assert!(worker.submit(7, DynamicImage::new_rgb8(0, 0)));
        let result = worker.results().recv().unwrap();
        assert_eq!(result.frame_id, 7);
        assert!(matches!(
            result.output,
            Err(VisionError::InvalidDimension { .. })
        ));

        let (_, rest) = worker.finish().unwrap();
        assert!(rest.is_empty());
    }
}

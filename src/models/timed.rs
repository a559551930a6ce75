// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 推理超时包装: 引擎在独立线程运行, 超过期限即放弃该帧

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use ndarray::{Array, IxDyn};
use tracing::{debug, warn};

use super::InferenceEngine;
use crate::error::{Result, VisionError};

type Request = (u64, Array<f32, IxDyn>);
type Reply = (u64, Result<Array<f32, IxDyn>>);

pub struct TimedEngine {
    name: String,
    class_names: Option<Vec<String>>,
    timeout: Duration,
    seq: u64,
    requests: Sender<Request>,
    replies: Receiver<Reply>,
}

impl TimedEngine {
    /// Move `engine` onto its own thread; each `run` waits at most `timeout`.
    pub fn new(engine: Box<dyn InferenceEngine>, timeout: Duration) -> Result<Self> {
        let name = format!("{} (timeout {:?})", engine.name(), timeout);
        let class_names = engine.class_names();
        let (requests, request_rx) = bounded::<Request>(1);
        let (reply_tx, replies) = bounded::<Reply>(4);

        thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || serve(engine, request_rx, reply_tx))?;

        Ok(Self {
            name,
            class_names,
            timeout,
            seq: 0,
            requests,
            replies,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn serve(
    mut engine: Box<dyn InferenceEngine>,
    requests: Receiver<Request>,
    replies: Sender<Reply>,
) {
    debug!(engine = engine.name(), "inference thread started");
    while let Ok((seq, input)) = requests.recv() {
        let output = engine.run(input);
        // 调用方已放弃时回复可能被丢弃
        if replies.try_send((seq, output)).is_err() {
            debug!(seq, "reply dropped");
        }
    }
    debug!("inference thread stopped");
}

impl InferenceEngine for TimedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_names(&self) -> Option<Vec<String>> {
        self.class_names.clone()
    }

    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
        let deadline = Instant::now() + self.timeout;
        self.seq += 1;
        let seq = self.seq;

        match self.requests.send_timeout((seq, input), self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(seq, "inference engine busy past deadline");
                return Err(VisionError::EngineTimeout(self.timeout));
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(VisionError::EngineUnavailable(
                    "inference thread has stopped".to_string(),
                ));
            }
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok((id, output)) if id == seq => return output,
                Ok((id, _)) => debug!(stale = id, current = seq, "discarding stale reply"),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(seq, timeout = ?self.timeout, "inference timed out");
                    return Err(VisionError::EngineTimeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VisionError::EngineUnavailable(
                        "inference thread has stopped".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// 第一次调用很慢, 输出中记录调用序号
    struct SlowFirst {
        calls: Arc<AtomicU32>,
        delay: Duration,
    }

    impl InferenceEngine for SlowFirst {
        fn name(&self) -> &str {
            "slow-first"
        }

        fn run(&mut self, _input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                thread::sleep(self.delay);
            }
            Ok(Array::from_elem(IxDyn(&[1]), call as f32))
        }
    }

    struct Broken;

    impl InferenceEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&mut self, _input: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
            Err(VisionError::EngineUnavailable("no device".to_string()))
        }
    }

    fn input() -> Array<f32, IxDyn> {
        Array::zeros(IxDyn(&[1, 3, 4, 4]))
    }

    #[test]
    fn slow_engine_times_out_and_stale_reply_is_discarded() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = SlowFirst {
            calls: calls.clone(),
            delay: Duration::from_millis(300),
        };
        let timeout = Duration::from_millis(100);
        let mut timed = TimedEngine::new(Box::new(engine), timeout).unwrap();

        assert!(matches!(
            timed.run(input()),
            Err(VisionError::EngineTimeout(_))
        ));

        // 等待第一帧的迟到回复进入通道
        thread::sleep(Duration::from_millis(400));
        let out = timed.run(input()).unwrap();
        assert_eq!(out[[0]], 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn engine_errors_pass_through() {
        let timeout = Duration::from_secs(1);
        let mut timed = TimedEngine::new(Box::new(Broken), timeout).unwrap();
        assert!(matches!(
            timed.run(input()),
            Err(VisionError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn name_mentions_the_wrapped_engine() {
        let timeout = Duration::from_millis(5);
        let timed = TimedEngine::new(Box::new(Broken), timeout).unwrap();
        assert!(timed.name().starts_with("broken"));
        assert_eq!(timed.timeout(), Duration::from_millis(5));
    }
}

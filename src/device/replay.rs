//! Scripted device reader
//!
//! Replays queued frames, one per read. An exhausted script reports nothing.
//! Optional latency makes reads slow enough to hit the controller read budget.

use super::{DeviceReader, RawActivation, ReadContext, ReadError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One scripted read result
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptFrame {
    Report(Vec<RawActivation>),
    Fail(String),
}

#[derive(Debug)]
pub struct ScriptedReader {
    name: String,
    frames: Mutex<VecDeque<ScriptFrame>>,
    latency: Option<Duration>,
    invocations: AtomicUsize,
}

impl ScriptedReader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: Mutex::new(VecDeque::new()),
            latency: None,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Every read waits this long before answering (or until cancelled)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_frame(&self, activations: Vec<RawActivation>) -> &Self {
        self.frames.lock().push_back(ScriptFrame::Report(activations));
        self
    }

    /// Queues the same frame `times` times, e.g. a held button
    pub fn hold(&self, activations: Vec<RawActivation>, times: usize) -> &Self {
        let mut frames = self.frames.lock();
        for _ in 0..times {
            frames.push_back(ScriptFrame::Report(activations.clone()));
        }
        drop(frames);
        self
    }

    pub fn push_idle(&self, times: usize) -> &Self {
        self.hold(Vec::new(), times)
    }

    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.frames.lock().push_back(ScriptFrame::Fail(message.into()));
        self
    }

    /// Number of `read` calls so far, including cancelled ones
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.frames.lock().len()
    }
}

#[async_trait]
impl DeviceReader for ScriptedReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(
        &self,
        context: &ReadContext,
        cancel: CancellationToken,
    ) -> Result<Vec<RawActivation>, ReadError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => {
                    debug!("Scripted read on {} cancelled", self.name);
                    return Ok(Vec::new());
                }
            }
        }

        let frame = self.frames.lock().pop_front();
        match frame {
            Some(ScriptFrame::Report(activations)) => Ok(activations),
            Some(ScriptFrame::Fail(message)) => Err(ReadError::Failed {
                device: context.device.clone(),
                message,
            }),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::user::UserId;

    fn context(device: &str, cycle: u64) -> ReadContext {
        ReadContext {
            user: UserId::new("p1"),
            device: DeviceId::new(device),
            cycle,
            now: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn frames_replay_in_order_then_run_dry() {
        let reader = ScriptedReader::new("kbd");
        reader
            .push_frame(vec![RawActivation::pressed("a")])
            .push_failure("unplugged");
        let ctx = context("kbd-0", 1);

        let first = reader.read(&ctx, CancellationToken::new()).await.unwrap();
        assert_eq!(first, vec![RawActivation::pressed("a")]);
        assert!(reader.read(&ctx, CancellationToken::new()).await.is_err());
        assert!(reader.read(&ctx, CancellationToken::new()).await.unwrap().is_empty());
        assert_eq!(reader.invocations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_a_slow_read_quietly() {
        let reader = ScriptedReader::new("slow").with_latency(Duration::from_secs(5));
        reader.push_frame(vec![RawActivation::pressed("a")]);
        let token = CancellationToken::new();
        token.cancel();

        let out = reader
            .read(&context("pad-0", 1), token)
            .await
            .unwrap();
        assert!(out.is_empty());
        // the frame was not consumed
        assert_eq!(reader.remaining(), 1);
    }
}

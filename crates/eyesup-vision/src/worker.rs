use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{FrameEvent, Pipeline};

/// One raw output frame from the inference collaborator.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub raw: Arc<[f32]>,
    pub inference_ms: u64,
}

impl Frame {
    pub fn new(seq: u64, raw: impl Into<Arc<[f32]>>, inference_ms: u64) -> Self {
        Self { seq, raw: raw.into(), inference_ms }
    }
}

/// Outcome of one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub seq: u64,
    pub event: FrameEvent,
}

/// Runs a [`Pipeline`] on its own thread.
///
/// Only the newest submitted frame is kept. A frame submitted while another
/// is being processed replaces anything still waiting, and the in-flight
/// frame's result is thrown away once it finishes.
pub struct Worker {
    frames: watch::Sender<Option<Frame>>,
    thread: JoinHandle<Pipeline>,
}

impl Worker {
    /// Starts the worker and returns it together with the result stream.
    pub fn spawn(pipeline: Pipeline) -> Result<(Self, mpsc::UnboundedReceiver<FrameResult>)> {
        let (frame_tx, frame_rx) = watch::channel::<Option<Frame>>(None);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .context("build worker runtime")?;

        let thread = std::thread::Builder::new()
            .name("eyesup-pipeline".into())
            .spawn(move || rt.block_on(run(pipeline, frame_rx, event_tx)))
            .context("spawn pipeline thread")?;

        info!("worker: started");
        Ok((Self { frames: frame_tx, thread }, event_rx))
    }

    /// Hands a frame to the worker without waiting.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        self.frames
            .send(Some(frame))
            .map_err(|_| anyhow::anyhow!("pipeline worker has stopped"))
    }

    /// Stops accepting frames, waits for the in-flight one and hands the
    /// pipeline back.
    pub fn shutdown(self) -> Result<Pipeline> {
        let Worker { frames, thread } = self;
        drop(frames);
        let pipeline = thread
            .join()
            .map_err(|_| anyhow::anyhow!("pipeline thread panicked"))?;
        info!("worker: stopped");
        Ok(pipeline)
    }
}

async fn run(
    mut pipeline: Pipeline,
    mut frames: watch::Receiver<Option<Frame>>,
    events: mpsc::UnboundedSender<FrameResult>,
) -> Pipeline {
    while frames.changed().await.is_ok() {
        let Some(frame) = frames.borrow_and_update().clone() else { continue; };

        let event = pipeline.process(&frame.raw, frame.inference_ms);

        // has_changed() errors once the sender is gone, borrow() still sees the last frame
        let latest = frames.borrow().as_ref().map(|f| f.seq);
        if latest != Some(frame.seq) {
            debug!("worker: frame {} superseded, result discarded", frame.seq);
            continue;
        }
        if events.send(FrameResult { seq: frame.seq, event }).is_err() {
            warn!("worker: result receiver gone, frame {} not delivered", frame.seq);
        }
    }
    pipeline
}

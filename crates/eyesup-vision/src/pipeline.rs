use std::time::Instant;

use tracing::{debug, info, warn};

use crate::decode::{decode, FrameShape, NUM_CLASSES};
use crate::labels::LabelTable;
use crate::nms::nms_filter;
use crate::tracker::{Track, Tracker, TrackerState};
use crate::{FrameEvent, PipelineError, TrackedBox, VisionConfig};

/// Name used if a class id ever falls outside the label table.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Decode, suppress, track and tag one frame at a time.
///
/// Holds the tracker state, so a single instance must only be driven from one
/// place at a time.
#[derive(Debug)]
pub struct Pipeline {
    cfg: VisionConfig,
    labels: LabelTable,
    shape: FrameShape,
    tracker: Tracker,
    state: TrackerState,
}

impl Pipeline {
    pub fn new(cfg: VisionConfig, labels: LabelTable, shape: FrameShape) -> Result<Self, PipelineError> {
        check_labels(&labels)?;
        if let Err(e) = shape.validate() {
            warn!("pipeline: {}; frames will be reported empty until reconfigured", e);
        }
        info!(
            "pipeline: ready shape={}x{} records={} labels={} strategy={:?}",
            shape.tensor_w, shape.tensor_h, shape.num_records, labels.len(), cfg.match_strategy
        );

        let tracker = Tracker::new(cfg.iou_match_threshold, cfg.match_strategy);
        Ok(Self { cfg, labels, shape, tracker, state: TrackerState::new() })
    }

    /// Swaps in a different association strategy, keeping tracker state.
    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replaces labels and shape and drops all tracks.
    pub fn reconfigure(&mut self, labels: LabelTable, shape: FrameShape) -> Result<(), PipelineError> {
        check_labels(&labels)?;
        if let Err(e) = shape.validate() {
            warn!("pipeline: {}; frames will be reported empty until reconfigured", e);
        }
        self.labels = labels;
        self.shape = shape;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state.reset();
        debug!("pipeline: tracker state reset");
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Runs one raw output frame through all stages.
    ///
    /// `inference_ms` is the collaborator's own timing; decode and
    /// suppression time is added on top. Anything that yields no boxes,
    /// including an unusable shape, comes back as [`FrameEvent::Empty`].
    pub fn process(&mut self, raw: &[f32], inference_ms: u64) -> FrameEvent {
        if !self.shape.is_valid() {
            debug!("pipeline: shape {:?} not usable, skipping frame", self.shape);
            return FrameEvent::Empty;
        }
        if raw.len() != self.shape.frame_len() {
            debug!(
                "pipeline: buffer has {} values, shape declares {}",
                raw.len(),
                self.shape.frame_len()
            );
        }

        let t0 = Instant::now();
        let candidates = decode(raw, self.cfg.conf_threshold);
        let kept = nms_filter(candidates, self.cfg.nms_iou_threshold, self.cfg.max_detections);
        let elapsed_ms = inference_ms + t0.elapsed().as_millis() as u64;

        // an empty frame still runs the tracker so stale tracks are dropped
        let tracks = self.tracker.update(&mut self.state, &kept);
        let boxes: Vec<TrackedBox> = tracks.iter().map(|t| self.resolve(t)).collect();
        let boxes = self.cfg.proximity.tag(&boxes);

        debug!("pipeline: {} boxes in {}ms", boxes.len(), elapsed_ms);
        FrameEvent::detected(boxes, elapsed_ms)
    }

    fn resolve(&self, t: &Track) -> TrackedBox {
        let name = self.labels.get(t.class_id).unwrap_or(UNKNOWN_LABEL);
        TrackedBox::from_corners(t.corners(), t.conf, t.class_id, name, t.id)
    }
}

fn check_labels(labels: &LabelTable) -> Result<(), PipelineError> {
    if labels.len() < NUM_CLASSES {
        return Err(PipelineError::LabelMismatch { labels: labels.len(), classes: NUM_CLASSES });
    }
    Ok(())
}

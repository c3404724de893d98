pub mod decode;
pub mod labels;
pub mod nms;
pub mod pipeline;
pub mod tagger;
pub mod tracker;
pub mod worker;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use decode::{decode, FrameShape, NUM_CLASSES, RECORD_STRIDE};
pub use labels::LabelTable;
pub use nms::{iou, nms_filter};
pub use pipeline::Pipeline;
pub use tagger::ProximityRule;
pub use tracker::{MatchStrategy, Track, Tracker, TrackerState};
pub use worker::{Frame, FrameResult, Worker};

pub use eyesup_proto::{Flag, FrameEvent, TrackedBox};

/// A decoded candidate before tracking. Corners are normalized to 0..1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn corners(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_nms_iou_threshold")]
    pub nms_iou_threshold: f32,
    /// Unset means no cap.
    #[serde(default)]
    pub max_detections: Option<usize>,

    #[serde(default = "default_iou_match_threshold")]
    pub iou_match_threshold: f32,
    #[serde(default)]
    pub match_strategy: MatchStrategy,

    #[serde(default)]
    pub proximity: ProximityRule,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            conf_threshold: default_conf_threshold(),
            nms_iou_threshold: default_nms_iou_threshold(),
            max_detections: None,
            iou_match_threshold: default_iou_match_threshold(),
            match_strategy: MatchStrategy::default(),
            proximity: ProximityRule::default(),
        }
    }
}

fn default_conf_threshold() -> f32 { 0.3 }
fn default_nms_iou_threshold() -> f32 { 0.5 }
fn default_iou_match_threshold() -> f32 { 0.3 }

/// Setup-time inconsistencies. Per-frame "nothing detected" outcomes are not
/// errors and never show up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid frame shape: {field} is zero")]
    ZeroShape { field: &'static str },

    #[error("label table has {labels} entries but the model emits {classes} classes")]
    LabelMismatch { labels: usize, classes: usize },

    #[error("read label table {path}")]
    Labels {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

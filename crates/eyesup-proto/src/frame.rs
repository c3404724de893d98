use serde::{Deserialize, Serialize};

/// Relation marker set by the proximity tagger. Renderers draw flagged boxes
/// with a highlight color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    ProximityAlert,
}

/// One tracked, labeled box as handed to a renderer.
///
/// Coordinates are normalized to 0..1. `track_id` and `class_id` are owned by
/// the pipeline; consumers read them but should not rewrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub conf: f32,
    pub class_id: usize,
    pub class_name: String,
    pub track_id: u64,
    pub flag: Option<Flag>,
}

impl TrackedBox {
    /// Builds a box from corners, deriving center and size.
    pub fn from_corners(
        [x1, y1, x2, y2]: [f32; 4],
        conf: f32,
        class_id: usize,
        class_name: impl Into<String>,
        track_id: u64,
    ) -> Self {
        let w = x2 - x1;
        let h = y2 - y1;
        Self {
            x1, y1, x2, y2,
            cx: x1 + w / 2.0,
            cy: y1 + h / 2.0,
            w, h,
            conf,
            class_id,
            class_name: class_name.into(),
            track_id,
            flag: None,
        }
    }

    pub fn corners(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn with_flag(mut self, flag: Option<Flag>) -> Self {
        self.flag = flag;
        self
    }
}

/// Per-frame result delivered to the rendering side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameEvent {
    /// Nothing survived the pipeline, or the frame could not be processed.
    Empty,
    /// Never carries an empty `boxes` list; use [`FrameEvent::Empty`] instead.
    Detected {
        boxes: Vec<TrackedBox>,
        inference_ms: u64,
    },
}

impl FrameEvent {
    pub fn detected(boxes: Vec<TrackedBox>, inference_ms: u64) -> Self {
        if boxes.is_empty() {
            FrameEvent::Empty
        } else {
            FrameEvent::Detected { boxes, inference_ms }
        }
    }

    pub fn boxes(&self) -> &[TrackedBox] {
        match self {
            FrameEvent::Empty => &[],
            FrameEvent::Detected { boxes, .. } => boxes,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FrameEvent::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_derives_center_and_size() {
        let b = TrackedBox::from_corners([0.4, 0.2, 0.6, 0.8], 0.9, 1, "head", 7);
        assert!((b.w - 0.2).abs() < 1e-6);
        assert!((b.h - 0.6).abs() < 1e-6);
        assert!((b.cx - 0.5).abs() < 1e-6);
        assert!((b.cy - 0.5).abs() < 1e-6);
        assert_eq!(b.flag, None);
        assert_eq!(b.track_id, 7);
    }

    #[test]
    fn detected_with_no_boxes_collapses_to_empty() {
        assert_eq!(FrameEvent::detected(Vec::new(), 12), FrameEvent::Empty);
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let b = TrackedBox::from_corners([0.1, 0.1, 0.2, 0.2], 0.5, 0, "cellphone", 0)
            .with_flag(Some(Flag::ProximityAlert));
        let ev = FrameEvent::detected(vec![b], 3);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "detected");
        assert_eq!(json["inference_ms"], 3);
        assert_eq!(json["boxes"][0]["flag"], "proximity_alert");

        let empty = serde_json::to_value(FrameEvent::Empty).unwrap();
        assert_eq!(empty["kind"], "empty");
    }
}

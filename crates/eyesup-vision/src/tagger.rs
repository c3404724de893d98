use serde::Deserialize;

use crate::{nms::iou, Flag, TrackedBox};

/// Flags a `subject` box that overlaps or sits close to an `anchor` box,
/// e.g. a phone held up to a head.
#[derive(Debug, Clone, Deserialize)]
pub struct ProximityRule {
    #[serde(default = "default_subject")]
    pub subject_class: String,
    #[serde(default = "default_anchor")]
    pub anchor_class: String,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

impl Default for ProximityRule {
    fn default() -> Self {
        Self {
            subject_class: default_subject(),
            anchor_class: default_anchor(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

fn default_subject() -> String { "cellphone".into() }
fn default_anchor() -> String { "head".into() }
fn default_iou_threshold() -> f32 { 0.3 }

impl ProximityRule {
    /// True when the pair overlaps enough, or when the centers are closer
    /// than the anchor is tall.
    pub fn related(&self, subject: &TrackedBox, anchor: &TrackedBox) -> bool {
        if iou(subject.corners(), anchor.corners()) >= self.iou_threshold {
            return true;
        }
        let dx = subject.cx - anchor.cx;
        let dy = subject.cy - anchor.cy;
        (dx * dx + dy * dy).sqrt() < anchor.h
    }

    /// Returns a copy of `boxes` with both sides of every related pair marked
    /// [`Flag::ProximityAlert`]. Boxes outside any pair keep their flag.
    pub fn tag(&self, boxes: &[TrackedBox]) -> Vec<TrackedBox> {
        let mut hit = vec![false; boxes.len()];
        for (i, s) in boxes.iter().enumerate() {
            if s.class_name != self.subject_class { continue; }
            for (j, a) in boxes.iter().enumerate() {
                if i == j || a.class_name != self.anchor_class { continue; }
                if self.related(s, a) {
                    hit[i] = true;
                    hit[j] = true;
                }
            }
        }

        boxes
            .iter()
            .zip(hit)
            .map(|(b, h)| {
                let flag = if h { Some(Flag::ProximityAlert) } else { b.flag };
                b.clone().with_flag(flag)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tb(corners: [f32; 4], name: &str, id: u64) -> TrackedBox {
        TrackedBox::from_corners(corners, 0.9, 0, name, id)
    }

    fn flags(boxes: &[TrackedBox]) -> Vec<Option<Flag>> {
        boxes.iter().map(|b| b.flag).collect()
    }

    #[test]
    fn overlapping_phone_and_head_are_flagged() {
        // iou = 0.04 / 0.1 = 0.4
        let boxes = vec![
            tb([0.0, 0.0, 0.35, 0.2], "cellphone", 0),
            tb([0.15, 0.0, 0.5, 0.2], "head", 1),
        ];
        let out = ProximityRule::default().tag(&boxes);
        assert_eq!(flags(&out), vec![Some(Flag::ProximityAlert); 2]);
        // input untouched
        assert_eq!(flags(&boxes), vec![None, None]);
    }

    #[test]
    fn near_but_disjoint_counts_via_head_height() {
        // centers ~0.255 apart, first head is 0.3 tall
        let boxes = vec![
            tb([0.50, 0.20, 0.60, 0.50], "head", 0),
            tb([0.00, 0.00, 0.10, 0.10], "head", 1),
            tb([0.55, 0.55, 0.65, 0.65], "cellphone", 2),
        ];
        let rule = ProximityRule::default();
        let out = rule.tag(&boxes);
        assert_eq!(out[2].flag, Some(Flag::ProximityAlert));
        assert_eq!(out[0].flag, Some(Flag::ProximityAlert));
        assert_eq!(out[1].flag, None);
    }

    #[test]
    fn far_apart_is_not_flagged() {
        let boxes = vec![
            tb([0.0, 0.0, 0.1, 0.1], "cellphone", 0),
            tb([0.8, 0.8, 0.9, 0.9], "head", 1),
        ];
        assert_eq!(flags(&ProximityRule::default().tag(&boxes)), vec![None, None]);
    }

    #[test]
    fn other_classes_are_ignored() {
        let boxes = vec![
            tb([0.1, 0.1, 0.3, 0.3], "cellphone", 0),
            tb([0.1, 0.1, 0.3, 0.3], "cellphone", 1),
            tb([0.1, 0.1, 0.3, 0.3], "person", 2),
        ];
        assert_eq!(flags(&ProximityRule::default().tag(&boxes)), vec![None; 3]);
    }

    #[test]
    fn tagging_twice_changes_nothing() {
        let boxes = vec![
            tb([0.0, 0.0, 0.3, 0.2], "cellphone", 0),
            tb([0.1, 0.0, 0.4, 0.2], "head", 1),
            tb([0.8, 0.8, 0.9, 0.9], "head", 2),
        ];
        let rule = ProximityRule::default();
        let once = rule.tag(&boxes);
        let twice = rule.tag(&once);
        assert_eq!(once, twice);
        assert_eq!(flags(&once)[2], None);
    }
}

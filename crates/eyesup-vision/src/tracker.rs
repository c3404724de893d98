use serde::Deserialize;
use tracing::debug;

use crate::{nms::iou, Detection};

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u64,
    pub class_id: usize,
    pub conf: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Track {
    fn from_detection(id: u64, d: &Detection) -> Self {
        Self { id, class_id: d.class_id, conf: d.conf, x1: d.x1, y1: d.y1, x2: d.x2, y2: d.y2 }
    }

    pub fn corners(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Tracks carried between frames plus the id counter.
///
/// Owned by whoever drives the tracker; build one directly to replay a known
/// situation.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: Vec<Track>, next_id: u64) -> Self {
        Self { tracks, next_id }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 0;
    }
}

/// Association step between this frame's detections and last frame's tracks.
///
/// Returns one slot per detection holding the index of the track it takes
/// over. A track index may appear at most once.
pub trait Matcher: Send + Sync {
    fn assign(&self, dets: &[Detection], tracks: &[Track], iou_th: f32) -> Vec<Option<usize>>;
}

/// Each detection, in order, takes the first free track above threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl Matcher for FirstMatch {
    fn assign(&self, dets: &[Detection], tracks: &[Track], iou_th: f32) -> Vec<Option<usize>> {
        let mut used_trk = vec![false; tracks.len()];
        let mut out = Vec::with_capacity(dets.len());
        for d in dets {
            let hit = (0..tracks.len())
                .find(|&j| !used_trk[j] && iou(d.corners(), tracks[j].corners()) > iou_th);
            if let Some(j) = hit {
                used_trk[j] = true;
            }
            out.push(hit);
        }
        out
    }
}

/// Pairs are taken in descending IoU order, so a detection never loses its
/// track to a weaker overlap that happened to come first.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestOverlap;

impl Matcher for BestOverlap {
    fn assign(&self, dets: &[Detection], tracks: &[Track], iou_th: f32) -> Vec<Option<usize>> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (i, d) in dets.iter().enumerate() {
            for (j, t) in tracks.iter().enumerate() {
                let o = iou(d.corners(), t.corners());
                if o > iou_th {
                    pairs.push((o, i, j));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = vec![None; dets.len()];
        let mut used_trk = vec![false; tracks.len()];
        for (_, i, j) in pairs {
            if out[i].is_some() || used_trk[j] { continue; }
            out[i] = Some(j);
            used_trk[j] = true;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    #[default]
    FirstMatch,
    BestOverlap,
}

impl MatchStrategy {
    fn matcher(self) -> Box<dyn Matcher> {
        match self {
            MatchStrategy::FirstMatch => Box::new(FirstMatch),
            MatchStrategy::BestOverlap => Box::new(BestOverlap),
        }
    }
}

/// IoU tracker without motion model: matched tracks take the detection's
/// geometry, unmatched detections open new tracks, unmatched tracks die.
pub struct Tracker {
    iou_match_threshold: f32,
    matcher: Box<dyn Matcher>,
}

impl Tracker {
    pub fn new(iou_match_threshold: f32, strategy: MatchStrategy) -> Self {
        Self { iou_match_threshold, matcher: strategy.matcher() }
    }

    pub fn with_matcher(iou_match_threshold: f32, matcher: Box<dyn Matcher>) -> Self {
        Self { iou_match_threshold, matcher }
    }

    pub fn update(&self, state: &mut TrackerState, dets: &[Detection]) -> Vec<Track> {
        let assigned = self.matcher.assign(dets, &state.tracks, self.iou_match_threshold);

        let mut new_tracks = Vec::with_capacity(dets.len());
        let mut matched = 0usize;
        for (d, slot) in dets.iter().zip(assigned) {
            let id = match slot {
                Some(j) => {
                    matched += 1;
                    state.tracks[j].id
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    id
                }
            };
            new_tracks.push(Track::from_detection(id, d));
        }

        debug!(
            "tracker: matched={} new={} dropped={}",
            matched,
            new_tracks.len() - matched,
            state.tracks.len().saturating_sub(matched)
        );

        state.tracks = new_tracks;
        state.tracks.clone()
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("iou_match_threshold", &self.iou_match_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize) -> Detection {
        Detection { x1, y1, x2, y2, conf: 0.8, class_id }
    }

    fn ids(tracks: &[Track]) -> Vec<u64> {
        tracks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn ids_persist_across_frames() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::new();

        let f1 = tracker.update(&mut state, &[det(0.1, 0.1, 0.3, 0.3, 0), det(0.6, 0.6, 0.8, 0.8, 1)]);
        assert_eq!(ids(&f1), vec![0, 1]);

        // moved slightly, order swapped
        let f2 = tracker.update(&mut state, &[det(0.61, 0.61, 0.81, 0.81, 1), det(0.11, 0.1, 0.31, 0.3, 0)]);
        assert_eq!(ids(&f2), vec![1, 0]);
        assert!((f2[0].x1 - 0.61).abs() < 1e-6);
        assert_eq!(state.next_id(), 2);
    }

    #[test]
    fn match_overwrites_class_and_score() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::new();
        tracker.update(&mut state, &[det(0.1, 0.1, 0.3, 0.3, 0)]);

        let mut d = det(0.1, 0.1, 0.3, 0.3, 2);
        d.conf = 0.42;
        let out = tracker.update(&mut state, &[d]);
        assert_eq!(out[0].id, 0);
        assert_eq!(out[0].class_id, 2);
        assert_eq!(out[0].conf, 0.42);
    }

    #[test]
    fn unmatched_track_is_dropped_for_good() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::new();
        let a = det(0.1, 0.1, 0.3, 0.3, 0);

        assert_eq!(ids(&tracker.update(&mut state, &[a])), vec![0]);
        assert!(tracker.update(&mut state, &[]).is_empty());
        assert!(state.tracks().is_empty());
        // same place again: a fresh identity
        assert_eq!(ids(&tracker.update(&mut state, &[a])), vec![1]);
    }

    #[test]
    fn threshold_is_strict() {
        let tracker = Tracker::new(0.5, MatchStrategy::FirstMatch);
        // iou([0,0,.2,.2],[.1,0,.3,.2]) = 1/3
        let mut state = TrackerState::with_tracks(
            vec![Track { id: 9, class_id: 0, conf: 0.9, x1: 0.0, y1: 0.0, x2: 0.2, y2: 0.2 }],
            10,
        );
        let out = tracker.update(&mut state, &[det(0.1, 0.0, 0.3, 0.2, 0)]);
        assert_eq!(ids(&out), vec![10]);

        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::with_tracks(
            vec![Track { id: 9, class_id: 0, conf: 0.9, x1: 0.0, y1: 0.0, x2: 0.2, y2: 0.2 }],
            10,
        );
        let out = tracker.update(&mut state, &[det(0.1, 0.0, 0.3, 0.2, 0)]);
        assert_eq!(ids(&out), vec![9]);
    }

    #[test]
    fn track_is_claimed_once_and_loser_gets_new_id() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::with_tracks(
            vec![Track { id: 0, class_id: 0, conf: 0.9, x1: 0.2, y1: 0.2, x2: 0.4, y2: 0.4 }],
            1,
        );
        // weaker overlap comes first and wins under first-match
        let weak = det(0.25, 0.25, 0.45, 0.45, 0);
        let strong = det(0.21, 0.21, 0.41, 0.41, 0);
        let out = tracker.update(&mut state, &[weak, strong]);
        assert_eq!(ids(&out), vec![0, 1]);
        assert!((out[0].x1 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn best_overlap_gives_track_to_closest_detection() {
        let tracker = Tracker::new(0.3, MatchStrategy::BestOverlap);
        let mut state = TrackerState::with_tracks(
            vec![Track { id: 0, class_id: 0, conf: 0.9, x1: 0.2, y1: 0.2, x2: 0.4, y2: 0.4 }],
            1,
        );
        let weak = det(0.25, 0.25, 0.45, 0.45, 0);
        let strong = det(0.21, 0.21, 0.41, 0.41, 0);
        let out = tracker.update(&mut state, &[weak, strong]);
        // output keeps detection order
        assert_eq!(ids(&out), vec![1, 0]);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::new();
        let mut seen = Vec::new();

        for k in 0..20 {
            let off = (k % 5) as f32 * 0.15;
            let dets = [det(off, 0.0, off + 0.1, 0.1, 0), det(0.0, 0.8, 0.1, 0.9, 1)];
            for t in tracker.update(&mut state, &dets) {
                if !seen.contains(&t.id) {
                    if let Some(&last) = seen.last() {
                        assert!(t.id > last);
                    }
                    seen.push(t.id);
                }
            }
            let out = state.tracks();
            assert!(out.len() <= dets.len());
            assert_ne!(out[0].id, out[1].id);
        }
        assert_eq!(state.next_id() as usize, seen.len());
    }

    #[test]
    fn reset_restarts_ids() {
        let tracker = Tracker::new(0.3, MatchStrategy::FirstMatch);
        let mut state = TrackerState::new();
        tracker.update(&mut state, &[det(0.1, 0.1, 0.3, 0.3, 0)]);
        state.reset();
        assert_eq!(state.next_id(), 0);
        assert!(state.tracks().is_empty());
    }
}

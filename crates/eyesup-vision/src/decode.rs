use tracing::{debug, warn};

use crate::{Detection, PipelineError};

/// Values per candidate: cx, cy, w, h, conf, then one score per class.
pub const RECORD_STRIDE: usize = 8;
pub const NUM_CLASSES: usize = 3;

const CLASS_OFFSET: usize = 5;

/// Declared tensor shapes, read once from the inference collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameShape {
    pub tensor_w: u32,
    pub tensor_h: u32,
    pub num_records: usize,
}

impl FrameShape {
    pub fn new(tensor_w: u32, tensor_h: u32, num_records: usize) -> Self {
        Self { tensor_w, tensor_h, num_records }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.tensor_w == 0 {
            return Err(PipelineError::ZeroShape { field: "tensor_w" });
        }
        if self.tensor_h == 0 {
            return Err(PipelineError::ZeroShape { field: "tensor_h" });
        }
        if self.num_records == 0 {
            return Err(PipelineError::ZeroShape { field: "num_records" });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Number of f32 values in one output frame.
    pub fn frame_len(&self) -> usize {
        self.num_records * RECORD_STRIDE
    }
}

/// Decodes a flat `[cx, cy, w, h, conf, s0, s1, s2]*` buffer into corner boxes.
///
/// Records with `conf <= conf_th`, a negative size, or any corner outside
/// 0..1 are skipped. A buffer that is not a whole number of records yields nothing.
pub fn decode(raw: &[f32], conf_th: f32) -> Vec<Detection> {
    if raw.len() % RECORD_STRIDE != 0 {
        warn!(
            "decode: buffer length {} is not a multiple of {}, skipping frame",
            raw.len(),
            RECORD_STRIDE
        );
        return Vec::new();
    }

    let mut out = Vec::new();
    for rec in raw.chunks_exact(RECORD_STRIDE) {
        let (cx, cy, w, h, conf) = (rec[0], rec[1], rec[2], rec[3], rec[4]);
        // NaN fails this too
        if !(conf > conf_th) {
            continue;
        }

        // negative or NaN size would invert the corners
        if !(w >= 0.0 && h >= 0.0) {
            continue;
        }

        let x1 = cx - w / 2.0;
        let y1 = cy - h / 2.0;
        let x2 = cx + w / 2.0;
        let y2 = cy + h / 2.0;
        if ![x1, y1, x2, y2].iter().all(|v| (0.0..=1.0).contains(v)) {
            continue;
        }

        let class_id = argmax(&rec[CLASS_OFFSET..CLASS_OFFSET + NUM_CLASSES]);
        out.push(Detection { x1, y1, x2, y2, conf, class_id });
    }

    debug!("decode: {} of {} records kept", out.len(), raw.len() / RECORD_STRIDE);
    out
}

// First maximum wins on ties.
fn argmax(scores: &[f32]) -> usize {
    let mut best_c = 0usize;
    let mut best_p = scores[0];
    for (c, &p) in scores.iter().enumerate().skip(1) {
        if p > best_p {
            best_p = p;
            best_c = c;
        }
    }
    best_c
}

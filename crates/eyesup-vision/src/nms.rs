use crate::Detection;

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
///
/// Boxes with zero area overlap nothing.
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }

    let ix_a = a[0].max(b[0]);
    let iy_a = a[1].max(b[1]);
    let ix_b = a[2].min(b[2]);
    let iy_b = a[3].min(b[3]);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy confidence-ordered suppression: a candidate is dropped when it
/// overlaps an already kept box by `iou_th` or more.
///
/// The sort is stable, so equal confidences keep decode order.
pub fn nms_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: Option<usize>) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let max_det = max_det.unwrap_or(usize::MAX);
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if iou(d.corners(), k.corners()) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

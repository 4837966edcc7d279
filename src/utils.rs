//! Bounding-box geometry helpers.
//!
//! All boxes are corner coordinates `[x1, y1, x2, y2]` in pixels.

/// Perform non-max suppression on boxes & scores, return indices to keep.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_unstable_by(|&i, &j| scores[j].partial_cmp(&scores[i]).unwrap());
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| compute_iou(&boxes[i], &boxes[j]) < iou_thresh)
            .collect();
    }
    keep
}

/// Compute IoU between two corner-coordinate boxes.
pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = (a[2] - a[0]) * (a[3] - a[1]);
    let b_area = (b[2] - b[0]) * (b[3] - b[1]);

    if a_area + b_area - inter_area <= 0.0 {
        return 0.0;
    }

    inter_area / (a_area + b_area - inter_area)
}

/// Order the corners of a box and clamp it to an image of the given size.
///
/// Guarantees `x1 <= x2`, `y1 <= y2` and all coordinates inside
/// `[0, width] x [0, height]`.
pub fn clamp_box(bbox: [f32; 4], width: f32, height: f32) -> [f32; 4] {
    let x1 = bbox[0].min(bbox[2]).clamp(0.0, width);
    let y1 = bbox[1].min(bbox[3]).clamp(0.0, height);
    let x2 = bbox[0].max(bbox[2]).clamp(0.0, width);
    let y2 = bbox[1].max(bbox[3]).clamp(0.0, height);
    [x1, y1, x2, y2]
}

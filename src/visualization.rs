use opencv::{
    core::{Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

use crate::detection::Detection;

const COLORS: &[Scalar] = &[
    Scalar::new(0.0, 255.0, 0.0, 0.0),    // Green
    Scalar::new(255.0, 0.0, 0.0, 0.0),    // Blue
    Scalar::new(0.0, 0.0, 255.0, 0.0),    // Red
    Scalar::new(255.0, 255.0, 0.0, 0.0),  // Cyan
    Scalar::new(255.0, 0.0, 255.0, 0.0),  // Magenta
    Scalar::new(0.0, 255.0, 255.0, 0.0),  // Yellow
];

/// Draw one detection: box plus a label with a dark background.
pub fn draw_detection(frame: &mut Mat, det: &Detection, color: Scalar) -> opencv::Result<()> {
    let tl = Point::new(det.bbox[0] as i32, det.bbox[1] as i32);
    let br = Point::new(det.bbox[2] as i32, det.bbox[3] as i32);

    let rect = Rect::new(tl.x, tl.y, br.x - tl.x, br.y - tl.y);
    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    let text = format!("{} {:.2}", det.label(), det.confidence);

    let mut baseline = 0;
    let text_size =
        imgproc::get_text_size(&text, imgproc::FONT_HERSHEY_SIMPLEX, 0.5, 1, &mut baseline)?;

    let bg_rect = Rect::new(
        tl.x,
        tl.y - text_size.height - 5,
        text_size.width,
        text_size.height + 5,
    );
    imgproc::rectangle(
        frame,
        bg_rect,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        -1, // filled
        imgproc::LINE_8,
        0,
    )?;

    let text_org = Point::new(tl.x, tl.y - 5);
    imgproc::put_text(
        frame,
        &text,
        text_org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        1,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}

/// Draw detections with a limit on how many to show
pub fn draw_detections(frame: &mut Mat, detections: &[Detection]) -> opencv::Result<()> {
    // Limit the number of visualized detections to avoid cluttering
    const MAX_VISUALIZED_DETECTIONS: usize = 20;

    let mut sorted_dets: Vec<&Detection> = detections.iter().collect();
    sorted_dets.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    for (i, det) in sorted_dets
        .iter()
        .take(MAX_VISUALIZED_DETECTIONS)
        .enumerate()
    {
        let color = COLORS[i % COLORS.len()];
        draw_detection(frame, det, color)?;
    }

    Ok(())
}

pub fn draw_frame_info(frame: &mut Mat, frame_id: i32, fps: f64) -> opencv::Result<()> {
    let text = format!("Frame: {} FPS: {:.1}", frame_id, fps);
    let text_pos = Point::new(10, 30);
    imgproc::put_text(
        frame,
        &text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

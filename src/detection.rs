use std::fs;
use std::path::{Path, PathBuf};

use opencv::{
    core::{Mat, Size, Vector, CV_32F},
    highgui, imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use serde::{Deserialize, Serialize};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::utils;
use crate::visualization;

const VIDEO_WINDOW: &str = "platecrop";

/// A single detection result.
///
/// `bbox` is corner coordinates `[x1, y1, x2, y2]` in pixels of the original
/// frame, with `x1 <= x2` and `y1 <= y2` guaranteed by postprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    /// Label for display, falling back to the numeric class id.
    pub fn label(&self) -> String {
        self.class_name
            .clone()
            .unwrap_or_else(|| format!("class_{}", self.class_id))
    }
}

/// Video input: a file on disk or a live camera index.
#[derive(Debug, Clone)]
pub enum VideoSource {
    File(PathBuf),
    Camera(i32),
}

impl std::str::FromStr for VideoSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.parse::<i32>() {
            Ok(index) => Ok(VideoSource::Camera(index)),
            Err(_) => Ok(VideoSource::File(PathBuf::from(s))),
        }
    }
}

impl std::fmt::Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoSource::File(path) => write!(f, "{}", path.display()),
            VideoSource::Camera(index) => write!(f, "camera {}", index),
        }
    }
}

impl VideoSource {
    fn output_name(&self) -> String {
        match self {
            VideoSource::File(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "video".to_string());
                format!("{}_annotated.mp4", stem)
            }
            VideoSource::Camera(index) => format!("camera{}_annotated.mp4", index),
        }
    }
}

/// Wraps a pretrained TorchScript plate-detection model.
pub struct Detector {
    model: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    class_names: Vec<String>,
}

impl Detector {
    /// Create a new detector from a model file and device ("cpu"/"cuda").
    pub fn new(
        model_path: &str,
        device: &str,
        input_size: (i64, i64),
        conf_threshold: f32,
        nms_threshold: f32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let device = if device == "cuda" && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let model = tch::CModule::load_on_device(model_path, device).map_err(|source| {
            Error::ModelLoad {
                path: model_path.to_string(),
                source,
            }
        })?;

        info!(model = model_path, ?device, "model loaded");

        Ok(Detector {
            model,
            device,
            input_size,
            conf_threshold,
            nms_threshold,
            class_names,
        })
    }

    /// Preprocess a frame into an NCHW float tensor in [0,1].
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.input_size.0 as i32, self.input_size.1 as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32F, 1.0 / 255.0, 0.0)?;
        debug_assert!(float_mat.is_continuous());

        let rows = float_mat.rows();
        let cols = float_mat.cols();
        let channels = float_mat.channels();
        let total_elements = (rows * cols * channels) as usize;
        let data =
            unsafe { std::slice::from_raw_parts(float_mat.data() as *const f32, total_elements) };

        // HWC -> [1, C, H, W]
        let tensor = Tensor::from_slice(data)
            .reshape([1, rows as i64, cols as i64, channels as i64])
            .permute([0, 3, 1, 2])
            .contiguous()
            .to_device(self.device)
            .to_kind(Kind::Float);

        Ok(tensor)
    }

    /// Postprocess raw model output into detections in frame coordinates.
    fn postprocess(&self, output: &Tensor, orig_size: (i32, i32)) -> Result<Vec<Detection>> {
        let shape = output.size();
        if shape.len() != 3 || shape[2] < 6 {
            return Err(Error::OutputShape(shape));
        }
        let num_classes = (shape[2] - 5) as usize;

        let flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1);
        let data = Vec::<f32>::try_from(&flat)?;

        Ok(decode_predictions(
            &data,
            num_classes,
            self.conf_threshold,
            self.nms_threshold,
            (self.input_size.0 as f32, self.input_size.1 as f32),
            (orig_size.0 as f32, orig_size.1 as f32),
            &self.class_names,
        ))
    }

    /// Detect plates in a single frame.
    pub fn detect(&self, frame: &Mat) -> Result<Vec<Detection>> {
        if frame.empty() {
            return Err(Error::EmptyImage);
        }
        let orig_size = (frame.cols(), frame.rows());
        let input = self.preprocess(frame)?;
        let output = tch::no_grad(|| self.model.forward_ts(&[&input]))?;
        self.postprocess(&output, orig_size)
    }

    /// Detect plates in one image and write an annotated copy under `save_dir`.
    pub fn detect_image(&self, image_path: &Path, save_dir: &Path) -> Result<Vec<Detection>> {
        let img = imgcodecs::imread(
            image_path.to_string_lossy().as_ref(),
            imgcodecs::IMREAD_COLOR,
        )?;
        if img.empty() {
            return Err(Error::ImageRead(image_path.to_path_buf()));
        }

        let detections = self.detect(&img)?;
        info!(
            image = %image_path.display(),
            count = detections.len(),
            "image detection finished"
        );

        let mut annotated = img.clone();
        visualization::draw_detections(&mut annotated, &detections)?;

        fs::create_dir_all(save_dir)?;
        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "annotated.jpg".to_string());
        let out_path = save_dir.join(file_name);
        if !imgcodecs::imwrite(out_path.to_string_lossy().as_ref(), &annotated, &Vector::new())? {
            return Err(Error::ImageWrite(out_path));
        }
        debug!(output = %out_path.display(), "annotated image written");

        Ok(detections)
    }

    /// Detect plates over a video file or camera stream.
    ///
    /// Writes an annotated video under `save_dir`; with `show` a live window
    /// is opened and ESC stops the loop. A frame that fails to process is
    /// logged and skipped, the stream keeps going.
    pub fn detect_video(&self, source: &VideoSource, save_dir: &Path, show: bool) -> Result<()> {
        let mut cap = match source {
            VideoSource::File(path) => {
                VideoCapture::from_file(path.to_string_lossy().as_ref(), videoio::CAP_ANY)?
            }
            VideoSource::Camera(index) => VideoCapture::new(*index, videoio::CAP_ANY)?,
        };
        if !cap.is_opened()? {
            return Err(Error::VideoOpen(source.to_string()));
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let mut fps = cap.get(videoio::CAP_PROP_FPS)?;
        if !(fps.is_finite() && fps > 0.0) {
            // cameras often report no rate
            fps = 30.0;
        }
        info!(%source, width, height, fps, "video source opened");

        fs::create_dir_all(save_dir)?;
        let out_path = save_dir.join(source.output_name());
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let mut writer = VideoWriter::new(
            out_path.to_string_lossy().as_ref(),
            fourcc,
            fps,
            Size::new(width, height),
            true,
        )?;
        let write_output = writer.is_opened()?;
        if !write_output {
            warn!(output = %out_path.display(), "could not open video writer, annotated output disabled");
        }

        if show {
            highgui::named_window(VIDEO_WINDOW, highgui::WINDOW_NORMAL)?;
        }

        let mut frame = Mat::default();
        let mut frame_id = 0;
        while cap.read(&mut frame)? {
            if frame.empty() {
                break;
            }

            let detections = match self.detect(&frame) {
                Ok(dets) => dets,
                Err(err) => {
                    warn!(frame_id, error = %err, "detection failed, skipping frame");
                    frame_id += 1;
                    continue;
                }
            };

            let mut annotated = frame.clone();
            visualization::draw_detections(&mut annotated, &detections)?;
            visualization::draw_frame_info(&mut annotated, frame_id, fps)?;

            if write_output {
                writer.write(&annotated)?;
            }
            if show {
                highgui::imshow(VIDEO_WINDOW, &annotated)?;
                if highgui::wait_key(1)? == 27 {
                    info!("stopped by user");
                    break;
                }
            }

            frame_id += 1;
            if frame_id % 30 == 0 {
                debug!(frame_id, "still processing");
            }
        }

        info!(frames = frame_id, output = %out_path.display(), "video detection finished");
        Ok(())
    }
}

/// Decode a flattened `[1, N, 5 + num_classes]` YOLO prediction tensor.
///
/// Rows are `[cx, cy, w, h, objectness, class scores...]` in model-input
/// pixels; confidence is objectness times the best class score. Kept boxes
/// are scaled to `frame_size`, clamped, and returned sorted by confidence.
pub(crate) fn decode_predictions(
    data: &[f32],
    num_classes: usize,
    conf_threshold: f32,
    nms_threshold: f32,
    input_size: (f32, f32),
    frame_size: (f32, f32),
    class_names: &[String],
) -> Vec<Detection> {
    let stride = 5 + num_classes;
    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut classes = Vec::new();

    for row in data.chunks_exact(stride) {
        let obj = row[4];
        let mut best_id = 0usize;
        let mut best_score = 0.0f32;
        for (c, &score) in row[5..].iter().enumerate() {
            if score > best_score {
                best_score = score;
                best_id = c;
            }
        }

        let conf = (obj * best_score).clamp(0.0, 1.0);
        if conf < conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        boxes.push([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
        scores.push(conf);
        classes.push(best_id as i32);
    }

    let keep = utils::nms(&boxes, &scores, nms_threshold);

    let scale_x = frame_size.0 / input_size.0;
    let scale_y = frame_size.1 / input_size.1;

    let mut detections = Vec::with_capacity(keep.len());
    for idx in keep {
        let b = boxes[idx];
        let bbox = utils::clamp_box(
            [b[0] * scale_x, b[1] * scale_y, b[2] * scale_x, b[3] * scale_y],
            frame_size.0,
            frame_size.1,
        );
        // degenerate after clamping
        if (bbox[2] - bbox[0]) * (bbox[3] - bbox[1]) < 1.0 {
            continue;
        }

        detections.push(Detection {
            bbox,
            confidence: scores[idx],
            class_id: classes[idx],
            class_name: class_names.get(classes[idx] as usize).cloned(),
        });
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::Path;

    const WEIGHTS: &str = "weights/license_plate_detector.torchscript";
    const FIXTURE: &str = "tests/data/license-plate.jpg";

    fn names() -> Vec<String> {
        vec!["license_plate".to_string()]
    }

    // one prediction row: [cx, cy, w, h, obj, cls0]
    fn rows(rows: &[[f32; 6]]) -> Vec<f32> {
        rows.iter().flatten().copied().collect()
    }

    #[test]
    fn decode_filters_and_suppresses() {
        let data = rows(&[
            [100.0, 100.0, 40.0, 20.0, 0.9, 0.95],
            // heavy overlap with the first, lower score
            [102.0, 100.0, 40.0, 20.0, 0.8, 0.9],
            // below the confidence threshold
            [300.0, 300.0, 40.0, 40.0, 0.1, 0.5],
        ]);

        let dets = decode_predictions(
            &data,
            1,
            0.25,
            0.45,
            (640.0, 640.0),
            (640.0, 640.0),
            &names(),
        );

        assert_eq!(dets.len(), 1);
        assert_relative_eq!(dets[0].confidence, 0.9 * 0.95);
        assert_eq!(dets[0].bbox, [80.0, 90.0, 120.0, 110.0]);
        assert_eq!(dets[0].class_name.as_deref(), Some("license_plate"));
    }

    #[test]
    fn decode_scales_to_frame_size() {
        let data = rows(&[[100.0, 100.0, 40.0, 20.0, 0.9, 0.95]]);
        let dets = decode_predictions(
            &data,
            1,
            0.25,
            0.45,
            (640.0, 640.0),
            (1280.0, 640.0),
            &names(),
        );
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, [160.0, 90.0, 240.0, 110.0]);
    }

    #[test]
    fn decode_clamps_to_frame_bounds() {
        let data = rows(&[[630.0, 630.0, 40.0, 40.0, 0.9, 0.95]]);
        let dets = decode_predictions(
            &data,
            1,
            0.25,
            0.45,
            (640.0, 640.0),
            (640.0, 640.0),
            &names(),
        );
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert_eq!(b, [610.0, 610.0, 640.0, 640.0]);
        assert!(b[0] <= b[2] && b[1] <= b[3]);
    }

    #[test]
    fn decode_confidence_stays_in_unit_range() {
        // out-of-range scores must not leak past the clamp
        let data = rows(&[[100.0, 100.0, 40.0, 20.0, 1.3, 1.1]]);
        let dets = decode_predictions(
            &data,
            1,
            0.25,
            0.45,
            (640.0, 640.0),
            (640.0, 640.0),
            &names(),
        );
        assert_eq!(dets.len(), 1);
        assert!(dets[0].confidence >= 0.0 && dets[0].confidence <= 1.0);
    }

    #[test]
    fn decode_sorts_by_confidence() {
        let data = rows(&[
            [100.0, 100.0, 40.0, 20.0, 0.6, 0.9],
            [400.0, 400.0, 40.0, 20.0, 0.9, 0.95],
        ]);
        let dets = decode_predictions(
            &data,
            1,
            0.25,
            0.45,
            (640.0, 640.0),
            (640.0, 640.0),
            &names(),
        );
        assert_eq!(dets.len(), 2);
        assert!(dets[0].confidence >= dets[1].confidence);
    }

    #[test]
    fn detects_single_plate_in_fixture() {
        // Skip when the model or the fixture is not checked out.
        if !Path::new(WEIGHTS).exists() || !Path::new(FIXTURE).exists() {
            return;
        }

        let detector = Detector::new(WEIGHTS, "cpu", (640, 640), 0.25, 0.45, names()).unwrap();
        let save_dir = std::env::temp_dir().join("platecrop_fixture_test");
        let dets = detector.detect_image(Path::new(FIXTURE), &save_dir).unwrap();

        assert_eq!(dets.len(), 1);
        assert!(dets[0].confidence > detector.conf_threshold);
        assert_eq!(dets[0].class_name.as_deref(), Some("license_plate"));
    }

    #[test]
    fn detection_is_deterministic() {
        if !Path::new(WEIGHTS).exists() || !Path::new(FIXTURE).exists() {
            return;
        }

        let detector = Detector::new(WEIGHTS, "cpu", (640, 640), 0.25, 0.45, names()).unwrap();
        let frame = opencv::imgcodecs::imread(FIXTURE, opencv::imgcodecs::IMREAD_COLOR).unwrap();

        let first = detector.detect(&frame).unwrap();
        let second = detector.detect(&frame).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.bbox, b.bbox);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.class_id, b.class_id);
        }
    }
}

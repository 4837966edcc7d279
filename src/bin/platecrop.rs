use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use platecrop::{crop, Config, Detector, VideoSource};

#[derive(Parser)]
#[command(
    name = "platecrop",
    about = "Detect license plates in images or video and crop the detected region",
    version
)]
struct Args {
    /// Image path, video path, or camera index
    #[arg(short, long, required = true)]
    input: String,

    /// Path to TorchScript model weights
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for annotated results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Where to save the cropped plate (image inputs)
    #[arg(long, default_value = "cropped_image.jpg")]
    crop_output: PathBuf,

    /// Where to save the original with the box drawn in (image inputs)
    #[arg(long, default_value = "bbox.jpg")]
    overlay_output: PathBuf,

    /// Confidence threshold override
    #[arg(long)]
    conf_threshold: Option<f32>,

    /// NMS IoU threshold override
    #[arg(long)]
    iou_threshold: Option<f32>,

    /// Show results in a window
    #[arg(long)]
    show: bool,
}

fn is_image(input: &str) -> bool {
    Path::new(input)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp"))
        .unwrap_or(false)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading config {:?}", path))?
        }
        None => Config::default(),
    };
    if let Some(weights) = &args.weights {
        config.model_path = weights.to_string_lossy().into_owned();
    }
    if let Some(conf) = args.conf_threshold {
        config.conf_threshold = conf;
    }
    if let Some(iou) = args.iou_threshold {
        config.nms_threshold = iou;
    }
    let save_dir = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.save_dir));

    let detector = Detector::new(
        &config.model_path,
        &config.device,
        (config.input_size[0], config.input_size[1]),
        config.conf_threshold,
        config.nms_threshold,
        config.class_names.clone(),
    )?;

    if is_image(&args.input) {
        run_image(&args, &detector, &save_dir)
    } else {
        let source: VideoSource = args.input.parse()?;
        detector.detect_video(&source, &save_dir, args.show)?;
        Ok(())
    }
}

fn run_image(args: &Args, detector: &Detector, save_dir: &Path) -> anyhow::Result<()> {
    let image_path = Path::new(&args.input);
    let detections = detector.detect_image(image_path, save_dir)?;

    if detections.is_empty() {
        info!("no license plates detected");
        return Ok(());
    }

    for det in &detections {
        info!(
            class = %det.label(),
            confidence = det.confidence,
            bbox = ?det.bbox,
            "detected object"
        );
    }

    let json_path = save_dir.join("detections.json");
    fs::write(&json_path, serde_json::to_string_pretty(&detections)?)?;
    info!(path = %json_path.display(), "detections written");

    // Detections come back sorted, the first is the most confident plate.
    let best = &detections[0];
    let result = crop::crop(image_path, best.bbox)?;
    crop::save(&result.cropped, &args.crop_output)?;
    crop::save(&result.overlay, &args.overlay_output)?;

    if args.show {
        crop::show(&result)?;
    }

    Ok(())
}

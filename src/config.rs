use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_path: String,
    pub device: String,
    pub input_size: [i64; 2],
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Class labels, indexed by class id.
    pub class_names: Vec<String>,
    pub save_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model_path: "license_plate_detector.torchscript".to_string(),
            device: "cpu".to_string(),
            input_size: [640, 640],
            conf_threshold: 0.25,
            nms_threshold: 0.45,
            class_names: vec!["license_plate".to_string()],
            save_dir: "runs/detect".to_string(),
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }
}

pub mod config;
pub mod crop;
pub mod detection;
pub mod error;
pub mod utils;
pub mod visualization;

// Re-export main types
pub use crate::config::Config;
pub use crate::detection::{Detection, Detector, VideoSource};
pub use crate::error::Error;

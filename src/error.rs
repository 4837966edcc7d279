use std::path::PathBuf;
use thiserror::Error;

/// Typed errors for the detection and cropping pipeline.
///
/// The library signals failures instead of returning empty results, so a
/// caller can tell "no plates found" apart from "detection broke".
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load model {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: tch::TchError,
    },

    #[error("inference error: {0}")]
    Inference(#[from] tch::TchError),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),

    #[error("could not read image {0}")]
    ImageRead(PathBuf),

    #[error("could not write image {0}")]
    ImageWrite(PathBuf),

    #[error("empty image, nothing to save")]
    EmptyImage,

    #[error("bounding box {bbox:?} has no area inside a {width}x{height} image")]
    EmptyCrop {
        bbox: [f32; 4],
        width: i32,
        height: i32,
    },

    #[error("could not open video source {0}")]
    VideoOpen(String),

    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<i64>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Crop a detected region out of an image.
//!
//! Bounding boxes are corner coordinates `[x1, y1, x2, y2]` in pixels, the
//! same convention detections use. Corners are ordered and clamped to the
//! image before slicing.

use std::fs;
use std::path::Path;

use opencv::{
    core::{Mat, Rect, Scalar, Vector},
    highgui, imgcodecs, imgproc,
    prelude::*,
};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::utils;

/// Result of a crop: the sub-image plus the original with the box drawn in.
pub struct Cropped {
    pub cropped: Mat,
    pub overlay: Mat,
}

/// Load an image and cut out `bbox`.
pub fn crop(image_path: &Path, bbox: [f32; 4]) -> Result<Cropped> {
    let image = imgcodecs::imread(
        image_path.to_string_lossy().as_ref(),
        imgcodecs::IMREAD_COLOR,
    )?;
    if image.empty() {
        warn!(image = %image_path.display(), "image not found or unreadable");
        return Err(Error::ImageRead(image_path.to_path_buf()));
    }

    let width = image.cols();
    let height = image.rows();
    let b = utils::clamp_box(bbox, width as f32, height as f32);

    let x = b[0].round() as i32;
    let y = b[1].round() as i32;
    let w = b[2].round() as i32 - x;
    let h = b[3].round() as i32 - y;
    if w <= 0 || h <= 0 {
        return Err(Error::EmptyCrop {
            bbox,
            width,
            height,
        });
    }

    let rect = Rect::new(x, y, w, h);
    let cropped = Mat::roi(&image, rect)?.try_clone()?;

    let mut overlay = image.clone();
    imgproc::rectangle(
        &mut overlay,
        rect,
        Scalar::new(0.0, 255.0, 0.0, 0.0),
        2,
        imgproc::LINE_8,
        0,
    )?;

    Ok(Cropped { cropped, overlay })
}

/// Write an image to disk. An empty image is an error and nothing is written.
pub fn save(image: &Mat, output_path: &Path) -> Result<()> {
    if image.empty() {
        warn!(path = %output_path.display(), "image is empty, nothing to save");
        return Err(Error::EmptyImage);
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if !imgcodecs::imwrite(output_path.to_string_lossy().as_ref(), image, &Vector::new())? {
        return Err(Error::ImageWrite(output_path.to_path_buf()));
    }
    info!(path = %output_path.display(), "image saved");
    Ok(())
}

/// Show the crop and the overlay in blocking windows until a key is pressed.
pub fn show(result: &Cropped) -> Result<()> {
    highgui::imshow("Cropped Image", &result.cropped)?;
    highgui::imshow("Image with Bounding Box", &result.overlay)?;
    highgui::wait_key(0)?;
    highgui::destroy_all_windows()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;
    use std::path::PathBuf;

    fn synthetic_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let img =
            Mat::new_rows_cols_with_default(100, 100, CV_8UC3, Scalar::all(127.0)).unwrap();
        assert!(imgcodecs::imwrite(path.to_str().unwrap(), &img, &Vector::new()).unwrap());
        path
    }

    #[test]
    fn crop_yields_expected_size() {
        let path = synthetic_image("platecrop_crop_size.png");
        let result = crop(&path, [10.0, 10.0, 50.0, 50.0]).unwrap();
        assert_eq!(result.cropped.cols(), 40);
        assert_eq!(result.cropped.rows(), 40);
        // overlay keeps the original dimensions
        assert_eq!(result.overlay.cols(), 100);
        assert_eq!(result.overlay.rows(), 100);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn crop_orders_swapped_corners() {
        let path = synthetic_image("platecrop_crop_swapped.png");
        let result = crop(&path, [50.0, 50.0, 10.0, 10.0]).unwrap();
        assert_eq!(result.cropped.cols(), 40);
        assert_eq!(result.cropped.rows(), 40);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn crop_clamps_to_image_bounds() {
        let path = synthetic_image("platecrop_crop_clamp.png");
        let result = crop(&path, [80.0, 80.0, 200.0, 200.0]).unwrap();
        assert_eq!(result.cropped.cols(), 20);
        assert_eq!(result.cropped.rows(), 20);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn crop_missing_file_is_an_error() {
        let err = crop(Path::new("no/such/image.jpg"), [10.0, 10.0, 50.0, 50.0]).unwrap_err();
        assert!(matches!(err, Error::ImageRead(_)));
    }

    #[test]
    fn crop_zero_area_box_is_an_error() {
        let path = synthetic_image("platecrop_crop_zero.png");
        let err = crop(&path, [10.0, 10.0, 10.0, 50.0]).unwrap_err();
        assert!(matches!(err, Error::EmptyCrop { .. }));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn save_empty_image_writes_nothing() {
        let path = std::env::temp_dir().join("platecrop_save_empty.png");
        let _ = fs::remove_file(&path);
        let err = save(&Mat::default(), &path).unwrap_err();
        assert!(matches!(err, Error::EmptyImage));
        assert!(!path.exists());
    }

    #[test]
    fn save_writes_readable_image() {
        let src = synthetic_image("platecrop_save_src.png");
        let out = std::env::temp_dir().join("platecrop_save_out.png");
        let result = crop(&src, [10.0, 10.0, 50.0, 50.0]).unwrap();
        save(&result.cropped, &out).unwrap();
        let reread = imgcodecs::imread(out.to_str().unwrap(), imgcodecs::IMREAD_COLOR).unwrap();
        assert_eq!(reread.cols(), 40);
        assert_eq!(reread.rows(), 40);
        let _ = fs::remove_file(src);
        let _ = fs::remove_file(out);
    }
}

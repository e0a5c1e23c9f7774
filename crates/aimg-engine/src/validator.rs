use std::fs;
use std::path::Path;

use image::ImageReader;

use crate::error::ValidationError;

/// Largest input accepted for a variation request, in bytes.
pub const MAX_INPUT_BYTES: u64 = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetrics {
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

impl ImageMetrics {
    pub fn is_square(&self) -> bool {
        self.width == self.height
    }
}

/// Reads the file size and header dimensions of `path`.
///
/// Oversize files are rejected before the header is decoded.
pub fn measure(path: &Path) -> Result<ImageMetrics, ValidationError> {
    let metadata = fs::metadata(path).map_err(|err| unreadable(path, err.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable(path, "not a regular file".to_string()));
    }
    let file_size = metadata.len();
    if file_size > MAX_INPUT_BYTES {
        return Err(ValidationError::ConstraintViolation {
            path: path.to_path_buf(),
            reason: format!("{file_size} bytes exceeds the {MAX_INPUT_BYTES} byte limit"),
        });
    }

    // Sniff the format from the header; the file name may carry no extension.
    let (width, height) = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| unreadable(path, err.to_string()))?
        .into_dimensions()
        .map_err(|err| unreadable(path, err.to_string()))?;
    let metrics = ImageMetrics {
        width,
        height,
        file_size,
    };
    tracing::debug!(
        path = %path.display(),
        file_size,
        width,
        height,
        "measured input image"
    );
    Ok(metrics)
}

pub fn validate(path: &Path) -> Result<(), ValidationError> {
    let metrics = measure(path)?;
    if !metrics.is_square() {
        return Err(ValidationError::ConstraintViolation {
            path: path.to_path_buf(),
            reason: format!(
                "{}x{} is not square",
                metrics.width, metrics.height
            ),
        });
    }
    Ok(())
}

fn unreadable(path: &Path, reason: String) -> ValidationError {
    ValidationError::FileUnreadable {
        path: path.to_path_buf(),
        reason,
    }
}

//! Fee-table imagery: locating the table on a deed's pages and reading the
//! registration fee from a cropped image with a vision model.

pub mod detector;
pub mod fee_reader;

pub use detector::*;
pub use fee_reader::*;

use std::path::Path;

use thiserror::Error;

use super::extraction::ExtractionError;
use super::structuring::StructuringError;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction tool error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Vision model error: {0}")]
    Structuring(#[from] StructuringError),

    #[error("Region detector failed: {0}")]
    Detector(String),

    #[error("Unsupported image type: {0}")]
    UnsupportedImage(String),
}

/// Finds the fee table on a page image and writes the crop to `output`.
pub trait RegionDetector: Send + Sync {
    /// `Ok(false)` when no region cleared the confidence threshold.
    fn detect_and_crop(&self, image: &Path, output: &Path) -> Result<bool, VisionError>;
}

/// Reads the registration fee from a cropped fee-table image.
pub trait FeeReader: Send + Sync {
    /// `Ok(None)` when the model could not read a positive fee.
    fn read_registration_fee(&self, image: &Path) -> Result<Option<f64>, VisionError>;
}

/// Mock detector for unit testing: either crops every page or finds nothing.
pub struct MockRegionDetector {
    pub found: bool,
}

impl MockRegionDetector {
    pub fn new(found: bool) -> Self {
        Self { found }
    }
}

impl RegionDetector for MockRegionDetector {
    fn detect_and_crop(&self, image: &Path, output: &Path) -> Result<bool, VisionError> {
        if self.found {
            std::fs::copy(image, output)?;
        }
        Ok(self.found)
    }
}

/// Mock fee reader for unit testing: the same answer for every image.
pub struct MockFeeReader {
    pub fee: Option<f64>,
}

impl MockFeeReader {
    pub fn new(fee: Option<f64>) -> Self {
        Self { fee }
    }
}

impl FeeReader for MockFeeReader {
    fn read_registration_fee(&self, image: &Path) -> Result<Option<f64>, VisionError> {
        if !image.is_file() {
            return Err(VisionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", image.display()),
            )));
        }
        Ok(self.fee)
    }
}

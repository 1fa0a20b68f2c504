//! Region detection over 8-bit luminance grids.

pub mod cascade;
pub mod grouping;
pub mod stock;

use image::{GrayImage, imageops};
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

pub use cascade::{CascadeDetector, HaarCascade};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    /// Copies the region out of `gray`. The region must lie inside the image.
    pub fn crop(&self, gray: &GrayImage) -> Result<GrayImage, DetectionError> {
        let (image_width, image_height) = gray.dimensions();
        if !self.fits_within(image_width, image_height) {
            return Err(DetectionError::RegionOutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                image_width,
                image_height,
            });
        }
        Ok(imageops::crop_imm(gray, self.x, self.y, self.width, self.height).to_image())
    }
}

/// Multi-scale scan settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Window growth per scale level; must exceed 1.
    pub scale_factor: f64,
    /// Grouped detections need strictly more than this many raw hits.
    pub min_neighbors: usize,
}

impl ScanParams {
    pub const FACE: ScanParams = ScanParams {
        scale_factor: 1.3,
        min_neighbors: 5,
    };

    pub const EYE: ScanParams = ScanParams {
        scale_factor: 1.1,
        min_neighbors: 3,
    };

    pub fn validate(&self) -> Result<(), DetectionError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(DetectionError::InvalidParams(format!(
                "scale factor must be finite and greater than 1, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Finds regions of one kind (faces, eyes, ...) in a luminance grid.
///
/// Implementations hold no mutable state, so one instance can serve
/// concurrent requests.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>, DetectionError>;
}

/// Stands in for a detector whose cascade is not installed. Every call fails
/// with the reason it could not be built.
#[derive(Debug, Clone)]
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl RegionDetector for Unavailable {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<Region>, DetectionError> {
        Err(DetectionError::Unavailable(self.reason.clone()))
    }
}

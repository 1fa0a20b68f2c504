//! Canonical decoded bitmap and the working grids the analyzers derive from it.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma, RgbImage};
use ndarray::Array2;
use std::sync::Arc;

use crate::error::{AnalyzerError, DecodeError};

/// An RGB8 pixel grid, shared read-only between the analyzers of one request.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: Arc<RgbImage>,
}

impl DecodedImage {
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DecodeError> {
        let actual = data.len();
        RgbImage::from_raw(width, height, data)
            .map(Self::new)
            .ok_or(DecodeError::BufferSize {
                width,
                height,
                actual,
            })
    }

    /// Decodes any format the `image` crate understands and converts it to RGB8.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::new(decoded.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    fn ensure_not_empty(&self) -> Result<(), AnalyzerError> {
        if self.is_empty() {
            return Err(AnalyzerError::EmptyImage {
                width: self.width(),
                height: self.height(),
            });
        }
        Ok(())
    }

    /// Bicubic resample into a fresh working copy.
    pub fn resized(&self, width: u32, height: u32) -> Result<RgbImage, AnalyzerError> {
        self.ensure_not_empty()?;
        if self.dimensions() == (width, height) {
            return Ok(self.pixels.as_ref().clone());
        }
        Ok(imageops::resize(
            self.pixels.as_ref(),
            width,
            height,
            FilterType::CatmullRom,
        ))
    }

    /// 8-bit luminance with BT.601 weights, rounded.
    pub fn luma8(&self) -> Result<GrayImage, AnalyzerError> {
        self.ensure_not_empty()?;
        let (width, height) = self.dimensions();
        Ok(GrayImage::from_fn(width, height, |x, y| {
            let [r, g, b] = self.pixels.get_pixel(x, y).0;
            let weighted = 19595 * u32::from(r) + 38470 * u32::from(g) + 7471 * u32::from(b);
            Luma([((weighted + 32768) >> 16) as u8])
        }))
    }
}

/// Channel mean of a unit-interval normalised RGB grid, indexed `[row, col]`.
pub fn unit_mean_luminance(rgb: &RgbImage) -> Array2<f64> {
    let (width, height) = rgb.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
        let [r, g, b] = rgb.get_pixel(col as u32, row as u32).0;
        (f64::from(r) / 255.0 + f64::from(g) / 255.0 + f64::from(b) / 255.0) / 3.0
    })
}

/// Raw 0..=255 intensities as floats, indexed `[row, col]`.
pub fn gray_to_array(gray: &GrayImage) -> Array2<f64> {
    let (width, height) = gray.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
        f64::from(gray.get_pixel(col as u32, row as u32).0[0])
    })
}

pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

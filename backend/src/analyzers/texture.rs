//! Texture/edge analyzer, served as `mesonet`.
//!
//! Over-smoothed images (low luminance variance, weak first-order edges) are
//! treated as synthesis artifacts.

use ndarray::{Array2, Axis, Slice};
use shared::ModelKind;

use super::{Analyzer, Assessment};
use crate::error::AnalyzerError;
use crate::imaging::{DecodedImage, unit_mean_luminance};

pub const WORKING_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextureAnalyzer;

impl TextureAnalyzer {
    pub fn new() -> Self {
        log::info!("MesoNet (texture/edge heuristic) initialized");
        Self
    }
}

impl Analyzer for TextureAnalyzer {
    fn kind(&self) -> ModelKind {
        ModelKind::Mesonet
    }

    fn assess(&self, image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
        let working = image.resized(WORKING_SIZE, WORKING_SIZE)?;
        let gray = unit_mean_luminance(&working);

        let variance = gray.var(0.0);
        let edge_strength = edge_strength(&gray);

        let texture_score = 1.0 - (variance * 10.0).min(1.0);
        let edge_score = 1.0 - (edge_strength * 5.0).min(1.0);
        let score = texture_score * 0.6 + edge_score * 0.4;

        Ok(Assessment::new(score)
            .with("variance", variance)
            .with("edge_strength", edge_strength)
            .with("texture_score", texture_score)
            .with("edge_score", edge_score))
    }
}

/// Mean absolute first difference down the rows plus along the columns.
pub fn edge_strength(gray: &Array2<f64>) -> f64 {
    mean_abs_diff(gray, Axis(0)) + mean_abs_diff(gray, Axis(1))
}

fn mean_abs_diff(gray: &Array2<f64>, axis: Axis) -> f64 {
    let len = gray.len_of(axis);
    if len < 2 {
        return 0.0;
    }
    let lead = gray.slice_axis(axis, Slice::from(1..));
    let trail = gray.slice_axis(axis, Slice::from(..len - 1));
    (&lead - &trail).mapv(f64::abs).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use ndarray::array;

    #[test]
    fn test_flat_gray_scores_as_fake() {
        let image = DecodedImage::new(RgbImage::from_pixel(256, 256, Rgb([128, 128, 128])));
        let result = TextureAnalyzer::new().predict(&image);

        assert_eq!(result.extra["variance"], 0.0);
        assert_eq!(result.extra["edge_strength"], 0.0);
        assert_eq!(result.extra["texture_score"], 1.0);
        assert_eq!(result.extra["edge_score"], 1.0);
        assert_eq!(result.score, 1.0);
        assert!(result.is_fake);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_edge_strength_sums_both_axes() {
        // Row differences: |3-1|, |4-2| -> mean 2. Column differences: 1, 1 -> mean 1.
        let grid = array![[1.0, 2.0], [3.0, 4.0]];
        assert!((edge_strength(&grid) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_checkerboard_is_textured() {
        let image = DecodedImage::new(RgbImage::from_fn(256, 256, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }));
        let result = TextureAnalyzer::new().predict(&image);

        // variance 0.25 saturates the texture term; edges saturate as well.
        assert_eq!(result.extra["texture_score"], 0.0);
        assert_eq!(result.extra["edge_score"], 0.0);
        assert_eq!(result.score, 0.0);
        assert!(!result.is_fake);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_empty_image_falls_back() {
        let image = DecodedImage::new(RgbImage::new(0, 0));
        let result = TextureAnalyzer::new().predict(&image);
        assert_eq!(result.score, 0.5);
        assert!(result.error.is_some());
    }
}

//! Feature-distribution analyzer, served as `xception`.

use shared::ModelKind;

use super::hog::{self, HogParams};
use super::{Analyzer, Assessment};
use crate::error::AnalyzerError;
use crate::imaging::{DecodedImage, unit_mean_luminance};

pub const WORKING_SIZE: u32 = 299;

/// Descriptor variance of "natural" images; deviation either way is penalised.
const REFERENCE_VARIANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy)]
pub struct FeatureAnalyzer {
    params: HogParams,
}

impl Default for FeatureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureAnalyzer {
    pub fn new() -> Self {
        log::info!("XceptionNet (gradient-histogram heuristic) initialized");
        Self {
            params: HogParams::default(),
        }
    }
}

impl Analyzer for FeatureAnalyzer {
    fn kind(&self) -> ModelKind {
        ModelKind::Xception
    }

    fn assess(&self, image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
        let working = image.resized(WORKING_SIZE, WORKING_SIZE)?;
        let gray = unit_mean_luminance(&working);

        let features = hog::descriptor(&gray, &self.params)?;
        let feature_variance = features.var(0.0);
        let score = ((feature_variance - REFERENCE_VARIANCE).abs() * 20.0).min(1.0);

        Ok(Assessment::new(score)
            .with("feature_variance", feature_variance)
            .with("feature_length", features.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_flat_image_scores_reference_distance() {
        let image = DecodedImage::new(RgbImage::from_pixel(299, 299, Rgb([90, 90, 90])));
        let result = FeatureAnalyzer::new().predict(&image);

        assert_eq!(result.extra["feature_variance"], 0.0);
        assert_eq!(result.extra["feature_length"], 46656.0);
        assert!((result.score - 0.4).abs() < 1e-12);
        assert!(!result.is_fake);
        assert!((result.confidence - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_small_input_is_resampled() {
        let image = DecodedImage::new(RgbImage::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, 100])
        }));
        let result = FeatureAnalyzer::new().predict(&image);
        assert!(result.error.is_none());
        assert!((0.0..=1.0).contains(&result.score));
    }
}

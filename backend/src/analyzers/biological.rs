//! Facial symmetry and eye-texture analyzer.
//!
//! Two region detectors run over the BT.601 luminance grid. The first face
//! is split down the middle and the mirrored right half compared with the
//! left; the first two eye regions are scored for over-uniform texture. A
//! missing face or fewer than two eyes yields the neutral 0.5 for that half
//! of the score, so an image with neither scores exactly 0.5.
//!
//! The detectors run OpenCV's stock face and eye cascades. When a stock
//! cascade is not installed the analyzer still loads, and every prediction
//! falls back to the neutral result with the reason in `error`.

use image::GrayImage;
use image::imageops::{self, FilterType};
use shared::{AnalyzerResult, ModelKind, NEUTRAL_SCORE};

use super::{Analyzer, Assessment};
use crate::config::{DetectionConfig, DetectorSettings};
use crate::detection::{Region, RegionDetector, Unavailable, stock};
use crate::error::{AnalyzerError, ConfigError, DetectionError};
use crate::imaging::{DecodedImage, gray_to_array};

pub struct BiologicalAnalyzer {
    faces: Box<dyn RegionDetector>,
    eyes: Box<dyn RegionDetector>,
}

impl BiologicalAnalyzer {
    pub fn new(faces: Box<dyn RegionDetector>, eyes: Box<dyn RegionDetector>) -> Self {
        log::info!("Biological analyzer initialized");
        Self { faces, eyes }
    }

    pub fn from_config(detection: &DetectionConfig) -> Result<Self, ConfigError> {
        let faces = detector_or_unavailable(&detection.face, stock::FRONTAL_FACE)?;
        let eyes = detector_or_unavailable(&detection.eye, stock::EYE)?;
        Ok(Self::new(faces, eyes))
    }
}

/// A missing stock cascade disables detection; an explicitly configured
/// cascade must load.
fn detector_or_unavailable(
    settings: &DetectorSettings,
    stock_file: &str,
) -> Result<Box<dyn RegionDetector>, DetectionError> {
    match settings.detector(stock_file) {
        Ok(detector) => Ok(Box::new(detector)),
        Err(e @ DetectionError::CascadeNotFound { .. }) => {
            log::warn!("Biological analyzer has no {} detector: {}", stock_file, e);
            Ok(Box::new(Unavailable::new(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

impl Analyzer for BiologicalAnalyzer {
    fn kind(&self) -> ModelKind {
        ModelKind::Biological
    }

    fn assess(&self, image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
        let gray = image.luma8()?;

        let faces = self.faces.detect(&gray)?;
        let symmetry_score = match faces.first() {
            Some(face) => symmetry(&face.crop(&gray)?)?,
            None => NEUTRAL_SCORE,
        };

        let eyes = self.eyes.detect(&gray)?;
        let eye_anomaly = match eyes.as_slice() {
            [first, second, ..] => {
                (eye_uniformity(&gray, first)? + eye_uniformity(&gray, second)?) / 2.0
            }
            _ => NEUTRAL_SCORE,
        };

        let score = symmetry_score * 0.6 + eye_anomaly * 0.4;
        Ok(Assessment::new(score)
            .with("symmetry_score", symmetry_score)
            .with("eye_anomaly", eye_anomaly)
            .with("faces_detected", faces.len() as f64)
            .with("eyes_detected", eyes.len() as f64))
    }

    fn fallback(&self, error: String) -> AnalyzerResult {
        let mut result = AnalyzerResult::neutral(error);
        result.extra.insert("symmetry_score".to_string(), NEUTRAL_SCORE);
        result.extra.insert("eye_anomaly".to_string(), NEUTRAL_SCORE);
        result
    }
}

/// `1 / (1 + mse / 1000)` between the left half and the mirrored right half.
pub fn symmetry(face: &GrayImage) -> Result<f64, AnalyzerError> {
    let (width, height) = face.dimensions();
    let mid = width / 2;
    if mid == 0 || height == 0 {
        return Err(DetectionError::DegenerateRegion(format!(
            "face crop of {}x{} cannot be split",
            width, height
        ))
        .into());
    }

    let left = imageops::crop_imm(face, 0, 0, mid, height).to_image();
    let right_half = imageops::crop_imm(face, mid, 0, width - mid, height).to_image();
    let mut right = imageops::flip_horizontal(&right_half);
    if right.width() != mid {
        right = imageops::resize(&right, mid, height, FilterType::Triangle);
    }

    let squared_error: f64 = left
        .pixels()
        .zip(right.pixels())
        .map(|(l, r)| {
            let diff = f64::from(l.0[0]) - f64::from(r.0[0]);
            diff * diff
        })
        .sum();
    let mse = squared_error / f64::from(mid * height);
    Ok(1.0 / (1.0 + mse / 1000.0))
}

/// `1 / (1 + variance / 100)` of the eye region's intensities.
fn eye_uniformity(gray: &GrayImage, eye: &Region) -> Result<f64, AnalyzerError> {
    if eye.area() == 0 {
        let reason = format!("empty eye region {:?}", eye);
        return Err(DetectionError::DegenerateRegion(reason).into());
    }
    let variance = gray_to_array(&eye.crop(gray)?).var(0.0);
    Ok(1.0 / (1.0 + variance / 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma, Rgb, RgbImage};

    struct Fixed(Vec<Region>);

    impl RegionDetector for Fixed {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<Region>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    fn analyzer(faces: Vec<Region>, eyes: Vec<Region>) -> BiologicalAnalyzer {
        BiologicalAnalyzer::new(Box::new(Fixed(faces)), Box::new(Fixed(eyes)))
    }

    fn gray_image(gray: GrayImage) -> DecodedImage {
        DecodedImage::new(DynamicImage::ImageLuma8(gray).to_rgb8())
    }

    #[test]
    fn test_nothing_detected_is_exactly_neutral() {
        let image = DecodedImage::new(RgbImage::from_pixel(64, 64, Rgb([120, 80, 40])));
        let result = analyzer(vec![], vec![Region::new(0, 0, 8, 8)]).predict(&image);

        assert!(result.error.is_none());
        assert_eq!(result.score, 0.5);
        assert!(!result.is_fake);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.extra["symmetry_score"], 0.5);
        assert_eq!(result.extra["eye_anomaly"], 0.5);
        assert_eq!(result.extra["eyes_detected"], 1.0);
    }

    #[test]
    fn test_symmetry_and_eye_arithmetic() {
        // Left half 100, right half 130: mse = 900 -> 1 / 1.9.
        // Eye regions: flat (variance 0) and 0/20 stripes (variance 100).
        let gray = GrayImage::from_fn(40, 20, |x, y| {
            let value = match (x, y) {
                (0..20, _) if y >= 10 && x < 4 => 70,
                (20..24, 10..14) => {
                    if x % 2 == 0 {
                        0
                    } else {
                        20
                    }
                }
                (0..20, _) => 100,
                _ => 130,
            };
            Luma([value])
        });
        let faces = vec![Region::new(0, 0, 40, 10)];
        let eyes = vec![Region::new(0, 10, 4, 4), Region::new(20, 10, 4, 4)];
        let result = analyzer(faces, eyes).predict(&gray_image(gray));

        let symmetry = 1.0 / 1.9;
        let eye = (1.0 + 0.5) / 2.0;
        assert!((result.extra["symmetry_score"] - symmetry).abs() < 1e-12);
        assert!((result.extra["eye_anomaly"] - eye).abs() < 1e-12);
        assert!((result.score - (symmetry * 0.6 + eye * 0.4)).abs() < 1e-12);
        assert_eq!(result.extra["faces_detected"], 1.0);
    }

    #[test]
    fn test_odd_width_face_is_resampled() {
        let face = GrayImage::from_pixel(9, 6, Luma([77]));
        assert_eq!(symmetry(&face).unwrap(), 1.0);
    }

    #[test]
    fn test_out_of_bounds_region_falls_back() {
        let image = DecodedImage::new(RgbImage::new(32, 32));
        let result = analyzer(vec![Region::new(20, 20, 30, 30)], vec![]).predict(&image);

        assert_eq!(result.score, 0.5);
        assert!(result.is_fallback());
        assert!(result.error.unwrap().contains("outside"));
        assert_eq!(result.extra["symmetry_score"], 0.5);
        assert_eq!(result.extra["eye_anomaly"], 0.5);
    }

    #[test]
    fn test_one_pixel_face_falls_back() {
        let image = DecodedImage::new(RgbImage::new(32, 32));
        let result = analyzer(vec![Region::new(3, 3, 1, 5)], vec![]).predict(&image);
        assert!(result.is_fallback());
    }

    #[test]
    fn test_missing_detector_falls_back_with_neutral_diagnostics() {
        let missing = Unavailable::new("haarcascade_frontalface_default.xml not found");
        let analyzer = BiologicalAnalyzer::new(Box::new(missing), Box::new(Fixed(vec![])));
        let image = DecodedImage::new(RgbImage::from_pixel(48, 48, Rgb([90, 90, 90])));
        let result = analyzer.predict(&image);

        assert_eq!(result.score, 0.5);
        assert!(!result.is_fake);
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.unwrap().contains("not found"));
        assert_eq!(result.extra["symmetry_score"], 0.5);
        assert_eq!(result.extra["eye_anomaly"], 0.5);
        assert!(!result.extra.contains_key("faces_detected"));
    }
}

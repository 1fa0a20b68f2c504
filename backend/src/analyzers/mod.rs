//! The four scoring functions and the contract they share.
//!
//! Every analyzer is a pure function of one immutable [`DecodedImage`]. The
//! fallible part of an analyzer lives in [`Analyzer::assess`]; the provided
//! [`Analyzer::predict`] is the containment boundary that turns any failure,
//! including a panic, into the neutral fallback result.

pub mod biological;
pub mod features;
pub mod frequency;
pub mod hog;
pub mod texture;

use shared::{AnalyzerResult, ModelKind};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::DetectionConfig;
use crate::error::{AnalyzerError, ConfigError};
use crate::imaging::DecodedImage;

pub use biological::BiologicalAnalyzer;
pub use features::FeatureAnalyzer;
pub use frequency::FrequencyAnalyzer;
pub use texture::TextureAnalyzer;

/// Analyzer-specific diagnostic values.
pub type Diagnostics = BTreeMap<String, f64>;

/// A computed score with its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub extra: Diagnostics,
}

impl Assessment {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            extra: Diagnostics::new(),
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    fn checked(self) -> Result<Self, AnalyzerError> {
        if !self.score.is_finite() {
            return Err(AnalyzerError::NonFinite("score"));
        }
        if self.extra.values().any(|value| !value.is_finite()) {
            return Err(AnalyzerError::NonFinite("diagnostic"));
        }
        Ok(self)
    }
}

pub trait Analyzer: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn assess(&self, image: &DecodedImage) -> Result<Assessment, AnalyzerError>;

    /// Always returns a well-formed result.
    fn predict(&self, image: &DecodedImage) -> AnalyzerResult {
        let kind = self.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.assess(image)))
            .unwrap_or_else(|payload| Err(AnalyzerError::Panicked(panic_message(payload))))
            .and_then(Assessment::checked);

        match outcome {
            Ok(assessment) => {
                log::debug!("{} score: {:.4}", kind.display_name(), assessment.score);
                AnalyzerResult::from_score(assessment.score, assessment.extra)
            }
            Err(e) => {
                log::error!("{} analysis failed: {}", kind.display_name(), e);
                self.fallback(e.to_string())
            }
        }
    }

    /// The neutral result reported when `assess` fails.
    fn fallback(&self, error: String) -> AnalyzerResult {
        AnalyzerResult::neutral(error)
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The analyzer instance behind each model slot of the ensemble.
#[derive(Clone)]
pub struct AnalyzerSet {
    mesonet: Arc<dyn Analyzer>,
    xception: Arc<dyn Analyzer>,
    frequency: Arc<dyn Analyzer>,
    biological: Arc<dyn Analyzer>,
}

impl AnalyzerSet {
    pub fn new(
        mesonet: Arc<dyn Analyzer>,
        xception: Arc<dyn Analyzer>,
        frequency: Arc<dyn Analyzer>,
        biological: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            mesonet,
            xception,
            frequency,
            biological,
        }
    }

    /// The standard heuristics, with region detectors built from `detection`.
    pub fn standard(detection: &DetectionConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Arc::new(TextureAnalyzer::new()),
            Arc::new(FeatureAnalyzer::new()),
            Arc::new(FrequencyAnalyzer::new()),
            Arc::new(BiologicalAnalyzer::from_config(detection)?),
        ))
    }

    pub fn get(&self, kind: ModelKind) -> &Arc<dyn Analyzer> {
        match kind {
            ModelKind::Mesonet => &self.mesonet,
            ModelKind::Xception => &self.xception,
            ModelKind::Frequency => &self.frequency,
            ModelKind::Biological => &self.biological,
        }
    }

    pub fn replace(mut self, kind: ModelKind, analyzer: Arc<dyn Analyzer>) -> Self {
        match kind {
            ModelKind::Mesonet => self.mesonet = analyzer,
            ModelKind::Xception => self.xception = analyzer,
            ModelKind::Frequency => self.frequency = analyzer,
            ModelKind::Biological => self.biological = analyzer,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct Fixed(f64);

    impl Analyzer for Fixed {
        fn kind(&self) -> ModelKind {
            ModelKind::Mesonet
        }

        fn assess(&self, _image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
            Ok(Assessment::new(self.0).with("marker", 1.0))
        }
    }

    struct Exploding;

    impl Analyzer for Exploding {
        fn kind(&self) -> ModelKind {
            ModelKind::Frequency
        }

        fn assess(&self, _image: &DecodedImage) -> Result<Assessment, AnalyzerError> {
            panic!("kaboom");
        }
    }

    fn blank() -> DecodedImage {
        DecodedImage::new(RgbImage::new(4, 4))
    }

    #[test]
    fn test_predict_passes_score_and_extra() {
        let result = Fixed(0.8).predict(&blank());
        assert_eq!(result.score, 0.8);
        assert!(result.is_fake);
        assert_eq!(result.extra.get("marker"), Some(&1.0));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_predict_contains_panic() {
        let result = Exploding.predict(&blank());
        assert_eq!(result.score, 0.5);
        assert!(!result.is_fake);
        assert_eq!(result.confidence, 0.0);
        let error = result.error.unwrap();
        assert!(error.contains("kaboom"), "{error}");
    }

    #[test]
    fn test_predict_rejects_nan() {
        let result = Fixed(f64::NAN).predict(&blank());
        assert_eq!(result.score, 0.5);
        assert_eq!(result.error.as_deref(), Some("non-finite score"));
    }
}

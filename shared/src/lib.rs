use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Score reported when an analyzer cannot make a determination.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// The four analyzers of the ensemble, under their wire names.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelKind {
    Mesonet,
    Xception,
    Frequency,
    Biological,
}

impl ModelKind {
    pub const COUNT: usize = 4;

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Mesonet => "MesoNet",
            ModelKind::Xception => "XceptionNet",
            ModelKind::Frequency => "Frequency",
            ModelKind::Biological => "Biological",
        }
    }
}

/// Output of a single analyzer.
///
/// Analyzer-specific diagnostics sit beside `score` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub score: f64,
    pub is_fake: bool,
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzerResult {
    pub fn from_score(score: f64, extra: BTreeMap<String, f64>) -> Self {
        Self {
            score,
            is_fake: score > 0.5,
            confidence: (score - 0.5).abs() * 2.0,
            extra,
            error: None,
        }
    }

    pub fn neutral(error: impl Into<String>) -> Self {
        Self {
            score: NEUTRAL_SCORE,
            is_fake: false,
            confidence: 0.0,
            extra: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Fixed per-analyzer weights of the ensemble. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub mesonet: f64,
    pub xception: f64,
    pub frequency: f64,
    pub biological: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            mesonet: 0.30,
            xception: 0.35,
            frequency: 0.20,
            biological: 0.15,
        }
    }
}

impl ModelWeights {
    pub fn get(&self, kind: ModelKind) -> f64 {
        match kind {
            ModelKind::Mesonet => self.mesonet,
            ModelKind::Xception => self.xception,
            ModelKind::Frequency => self.frequency,
            ModelKind::Biological => self.biological,
        }
    }

    pub fn sum(&self) -> f64 {
        self.mesonet + self.xception + self.frequency + self.biological
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Voting {
    pub fake_votes: u32,
    pub real_votes: u32,
    pub individual_votes: BTreeMap<ModelKind, bool>,
}

/// Verdict of the weighted ensemble plus the per-analyzer breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub is_deepfake: bool,
    pub confidence_score: f64,
    pub ensemble_score: f64,
    pub model_scores: BTreeMap<ModelKind, f64>,
    pub voting: Voting,
    pub ensemble_weights: ModelWeights,
    pub model_details: BTreeMap<ModelKind, AnalyzerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct InferenceRequest {
    pub image_data: String,
}

/// Metadata about an uploaded image, as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: Option<String>,
    pub size: usize,
    pub dimensions: (u32, u32),
    pub format: Option<String>,
    pub sha256: String,
}

/// Response of the ensemble endpoints: the verdict with the upload's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    #[serde(flatten)]
    pub result: EnsembleResult,
    pub file_info: FileInfo,
}

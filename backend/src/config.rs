use serde::{Deserialize, Serialize};
use shared::{ModelKind, ModelWeights};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::detection::{CascadeDetector, HaarCascade, ScanParams, stock};
use crate::error::{ConfigError, DetectionError};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Hard ceiling on a single image upload.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub weights: ModelWeights,
    pub engine: EngineConfig,
    pub detection: DetectionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run the four analyzers on separate threads.
    pub parallel: bool,
    pub deadline_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            deadline_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub face: DetectorSettings,
    pub eye: DetectorSettings,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            face: DetectorSettings::from(ScanParams::FACE),
            eye: DetectorSettings::from(ScanParams::EYE),
        }
    }
}

/// Scan settings for one detector, optionally naming a cascade XML file to
/// use instead of the stock OpenCV one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<PathBuf>,
}

impl From<ScanParams> for DetectorSettings {
    fn from(params: ScanParams) -> Self {
        Self {
            scale_factor: params.scale_factor,
            min_neighbors: params.min_neighbors,
            cascade: None,
        }
    }
}

impl DetectorSettings {
    pub fn scan_params(&self) -> ScanParams {
        ScanParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
        }
    }

    pub fn detector(&self, stock_file: &str) -> Result<CascadeDetector, DetectionError> {
        let (name, cascade) = match &self.cascade {
            Some(path) => {
                log::info!("Loading cascade from {}", path.display());
                (path.display().to_string(), HaarCascade::load(path)?)
            }
            None => (stock_file.to_string(), stock::load(stock_file)?),
        };
        CascadeDetector::new(name, cascade, self.scan_params())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_analyses: usize,
    /// Per-image limit, at most [`MAX_UPLOAD_BYTES`].
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8003,
            allowed_origins: vec!["*".to_string()],
            max_concurrent_analyses: 4,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl ModelsConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ModelsConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reads `MODELS_CONFIG`, else `config/models.yaml` next to the
    /// workspace, else the defaults, then applies `PORT` and
    /// `ALLOWED_ORIGINS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("MODELS_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => Self::load(path)?,
                None => {
                    log::warn!("No models config found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => config.server.port = port,
                Err(_) => log::warn!("Ignoring invalid PORT value {:?}", port),
            }
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").ok()?;
        Some(Path::new(&manifest_dir).join("../config/models.yaml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_weights(&self.weights)?;
        self.detection.face.scan_params().validate()?;
        self.detection.eye.scan_params().validate()?;
        let upload_limit = self.server.max_upload_bytes;
        if upload_limit == 0 || upload_limit > MAX_UPLOAD_BYTES {
            return Err(ConfigError::InvalidServer(format!(
                "max_upload_bytes {} is outside 1..={}",
                upload_limit, MAX_UPLOAD_BYTES
            )));
        }
        Ok(())
    }
}

pub fn validate_weights(weights: &ModelWeights) -> Result<(), ConfigError> {
    for kind in ModelKind::iter() {
        let weight = weights.get(kind);
        if !(weight > 0.0 && weight <= 1.0) {
            return Err(ConfigError::InvalidWeights(format!(
                "{} weight {} is outside (0, 1]",
                kind, weight
            )));
        }
    }
    let sum = weights.sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::InvalidWeights(format!(
            "weights sum to {}, expected 1.0",
            sum
        )));
    }
    Ok(())
}

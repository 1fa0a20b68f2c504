use shared::ModelKind;
use std::path::PathBuf;

/// Failure inside a single analyzer. Never leaves the analyzer boundary:
/// `Analyzer::predict` turns it into the neutral fallback.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("image too small: {0}")]
    TooSmall(String),
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("non-finite {0}")]
    NonFinite(&'static str),
    #[error("analyzer panicked: {0}")]
    Panicked(String),
}

/// Failure of the combiner itself. Reported as the safe-default verdict.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    #[error("failed to start {kind} worker: {source}")]
    Spawn {
        kind: ModelKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} worker exited without a result")]
    WorkerLost(ModelKind),
    #[error("analysis deadline of {0} ms exceeded")]
    DeadlineExceeded(u128),
    #[error("{kind} returned out-of-range score {score}")]
    ContractViolation { kind: ModelKind, score: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("cascade file {path}: {source}")]
    CascadeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cascade XML error: {0}")]
    CascadeXml(#[from] quick_xml::Error),
    #[error("{file} not found in any of {searched:?}")]
    CascadeNotFound { file: String, searched: Vec<PathBuf> },
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("invalid scan parameters: {0}")]
    InvalidParams(String),
    #[error("region {x},{y} {width}x{height} outside {image_width}x{image_height} image")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
    #[error("degenerate region: {0}")]
    DegenerateRegion(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid weights: {0}")]
    InvalidWeights(String),
    #[error("invalid detector settings: {0}")]
    Detection(#[from] DetectionError),
    #[error("invalid server settings: {0}")]
    InvalidServer(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pixel buffer of {actual} bytes does not match {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        actual: usize,
    },
    #[error("no file in upload")]
    MissingFile,
    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

//! # DeepTrust models
//!
//! Heuristic deepfake scoring for single decoded images. Four independent
//! analyzers each produce a score in [0, 1] and a fixed-weight ensemble turns
//! them into a verdict.
//!
//! - **mesonet**: pixel variance and edge strength of a 256x256 resample
//! - **xception**: spread of a dense oriented-gradient descriptor at 299x299
//! - **frequency**: Fourier and DCT high-frequency anomalies
//! - **biological**: facial symmetry and eye-region texture via cascade detectors
//!
//! ```no_run
//! use deeptrust_models::{DecodedImage, Ensemble, ModelsConfig};
//!
//! let config = ModelsConfig::from_env()?;
//! let ensemble = Ensemble::from_config(&config)?;
//! let image = DecodedImage::decode(&std::fs::read("face.png")?)?;
//! let result = ensemble.predict(&image);
//! println!("deepfake: {} ({:.2})", result.is_deepfake, result.ensemble_score);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Analyzers never fail outward: any error or panic inside one becomes a
//! neutral 0.5 result with `error` set, and the ensemble always returns a
//! complete [`EnsembleResult`].

pub mod analyzers;
pub mod config;
pub mod detection;
pub mod ensemble;
pub mod error;
pub mod imaging;
pub mod routes;

pub use analyzers::{Analyzer, AnalyzerSet, Assessment};
pub use config::ModelsConfig;
pub use ensemble::Ensemble;
pub use error::{AnalyzerError, ConfigError, DecodeError, DetectionError, EnsembleError};
pub use imaging::DecodedImage;
pub use shared::{AnalyzerResult, EnsembleResult, ModelKind, ModelWeights, Voting};

//! Weighted combination of the four analyzers.
//!
//! The verdict is driven by `ensemble_score` alone. The voting block is
//! reported next to it and may disagree with it.

use shared::{AnalyzerResult, EnsembleResult, ModelKind, ModelWeights, NEUTRAL_SCORE, Voting};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use strum::IntoEnumIterator;

use crate::analyzers::{Analyzer, AnalyzerSet};
use crate::config::{EngineConfig, ModelsConfig, validate_weights};
use crate::error::{ConfigError, EnsembleError};
use crate::imaging::DecodedImage;

type Details = BTreeMap<ModelKind, AnalyzerResult>;
type Lease = Arc<dyn Any + Send + Sync>;

pub struct Ensemble {
    analyzers: AnalyzerSet,
    weights: ModelWeights,
    engine: EngineConfig,
    in_flight: Arc<AtomicUsize>,
}

/// Counts one live worker thread until dropped.
struct WorkerGuard(Arc<AtomicUsize>);

impl WorkerGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Ensemble {
    pub fn new(
        analyzers: AnalyzerSet,
        weights: ModelWeights,
        engine: EngineConfig,
    ) -> Result<Self, ConfigError> {
        validate_weights(&weights)?;
        log::info!(
            "Ensemble initialized with weights: mesonet={}, xception={}, frequency={}, biological={}",
            weights.mesonet,
            weights.xception,
            weights.frequency,
            weights.biological
        );
        Ok(Self {
            analyzers,
            weights,
            engine,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn from_config(config: &ModelsConfig) -> Result<Self, ConfigError> {
        let analyzers = AnalyzerSet::standard(&config.detection)?;
        Self::new(analyzers, config.weights, config.engine.clone())
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn analyzer(&self, kind: ModelKind) -> &Arc<dyn Analyzer> {
        self.analyzers.get(kind)
    }

    /// Analyzer worker threads still running, including those abandoned at
    /// a deadline.
    pub fn workers_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn predict(&self, image: &DecodedImage) -> EnsembleResult {
        self.evaluate(image, None, Arc::new(()))
    }

    /// Like [`Ensemble::predict`], but gives up once `deadline` has elapsed
    /// and returns the safe default instead of a partial result. Workers
    /// that miss the deadline run to completion in the background.
    pub fn predict_within(&self, image: &DecodedImage, deadline: Duration) -> EnsembleResult {
        self.evaluate(image, Some(deadline), Arc::new(()))
    }

    /// [`Ensemble::predict_within`] that keeps `lease` alive until the last
    /// worker thread of this call exits, even after the call has returned.
    pub fn predict_within_holding<L>(
        &self,
        image: &DecodedImage,
        deadline: Duration,
        lease: L,
    ) -> EnsembleResult
    where
        L: Send + Sync + 'static,
    {
        self.evaluate(image, Some(deadline), Arc::new(lease))
    }

    fn evaluate(
        &self,
        image: &DecodedImage,
        deadline: Option<Duration>,
        lease: Lease,
    ) -> EnsembleResult {
        let details = if self.engine.parallel || deadline.is_some() {
            self.fan_out(image, deadline, lease)
        } else {
            Ok(self.sequential(image))
        };

        match details.and_then(|details| self.combine(details)) {
            Ok(result) => {
                log::info!(
                    "Ensemble verdict: {} (confidence {:.1}%, score {:.4})",
                    if result.is_deepfake { "DEEPFAKE" } else { "AUTHENTIC" },
                    result.confidence_score * 100.0,
                    result.ensemble_score
                );
                result
            }
            Err(e) => {
                log::error!("Ensemble prediction failed: {}", e);
                self.safe_default(e.to_string())
            }
        }
    }

    fn sequential(&self, image: &DecodedImage) -> Details {
        ModelKind::iter()
            .map(|kind| (kind, self.analyzers.get(kind).predict(image)))
            .collect()
    }

    /// One worker thread per analyzer; waits for all four before returning.
    fn fan_out(
        &self,
        image: &DecodedImage,
        deadline: Option<Duration>,
        lease: Lease,
    ) -> Result<Details, EnsembleError> {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel();

        for kind in ModelKind::iter() {
            let analyzer = Arc::clone(self.analyzers.get(kind));
            let image = image.clone();
            let tx = tx.clone();
            let lease = Arc::clone(&lease);
            let worker = WorkerGuard::enter(&self.in_flight);
            thread::Builder::new()
                .name(format!("analyzer-{}", kind))
                .spawn(move || {
                    let result = analyzer.predict(&image);
                    // The receiver is gone once the deadline has passed.
                    let _ = tx.send((kind, result));
                    drop(lease);
                    drop(worker);
                })
                .map_err(|source| EnsembleError::Spawn { kind, source })?;
        }
        drop(tx);
        drop(lease);

        let mut details = Details::new();
        while details.len() < ModelKind::COUNT {
            let (kind, result) = match deadline {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    rx.recv_timeout(remaining).map_err(|e| match e {
                        RecvTimeoutError::Timeout => {
                            EnsembleError::DeadlineExceeded(limit.as_millis())
                        }
                        RecvTimeoutError::Disconnected => missing_worker(&details),
                    })?
                }
                None => rx.recv().map_err(|_| missing_worker(&details))?,
            };
            details.insert(kind, result);
        }
        Ok(details)
    }

    fn combine(&self, details: Details) -> Result<EnsembleResult, EnsembleError> {
        let mut model_scores = BTreeMap::new();
        let mut voting = Voting::default();
        let mut ensemble_score = 0.0;

        for kind in ModelKind::iter() {
            let result = details.get(&kind).ok_or(EnsembleError::WorkerLost(kind))?;
            if !(0.0..=1.0).contains(&result.score) {
                return Err(EnsembleError::ContractViolation {
                    kind,
                    score: result.score,
                });
            }
            ensemble_score += self.weights.get(kind) * result.score;
            model_scores.insert(kind, result.score);

            if result.is_fake {
                voting.fake_votes += 1;
            }
            voting.individual_votes.insert(kind, result.is_fake);
        }
        voting.real_votes = ModelKind::COUNT as u32 - voting.fake_votes;

        Ok(EnsembleResult {
            is_deepfake: ensemble_score > 0.5,
            confidence_score: (ensemble_score - 0.5).abs() * 2.0,
            ensemble_score,
            model_scores,
            voting,
            ensemble_weights: self.weights,
            model_details: details,
            error: None,
        })
    }

    fn safe_default(&self, error: String) -> EnsembleResult {
        EnsembleResult {
            is_deepfake: false,
            confidence_score: 0.0,
            ensemble_score: NEUTRAL_SCORE,
            model_scores: BTreeMap::new(),
            voting: Voting::default(),
            ensemble_weights: self.weights,
            model_details: BTreeMap::new(),
            error: Some(error),
        }
    }
}

fn missing_worker(details: &Details) -> EnsembleError {
    let kind = ModelKind::iter()
        .find(|kind| !details.contains_key(kind))
        .unwrap_or(ModelKind::Mesonet);
    EnsembleError::WorkerLost(kind)
}

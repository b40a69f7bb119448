//! Prediction capability
//!
//! An optional model estimating expected return, confidence and risk for a
//! candidate. The pipeline never depends on it: a timeout, error, panic or
//! out-of-range output all degrade to [`PredictionOutcome::Unavailable`] and
//! the decision proceeds without a prediction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::types::Candidate;

/// Model output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub expected_return_pct: f64,
    /// 0..=1
    pub confidence: f64,
    /// 0..=1
    pub risk_score: f64,
}

impl Prediction {
    fn is_valid(&self) -> bool {
        self.expected_return_pct.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && (0.0..=1.0).contains(&self.risk_score)
    }
}

/// Result of asking the model
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Available(Prediction),
    Unavailable(String),
}

impl PredictionOutcome {
    pub fn prediction(&self) -> Option<Prediction> {
        match self {
            PredictionOutcome::Available(p) => Some(*p),
            PredictionOutcome::Unavailable(_) => None,
        }
    }
}

/// Prediction model
#[async_trait]
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(&self, candidate: &Candidate) -> Result<Prediction>;
}

/// Wraps a predictor with a deadline and fault isolation
#[derive(Clone)]
pub struct GuardedPredictor {
    inner: Arc<dyn Predictor>,
    timeout: Duration,
}

impl GuardedPredictor {
    pub fn new(inner: Arc<dyn Predictor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Ask the model; never fails
    pub async fn predict(&self, candidate: &Candidate) -> PredictionOutcome {
        let inner = self.inner.clone();
        let owned = candidate.clone();
        // Own task so a panicking model cannot take the worker down
        let mut task = tokio::spawn(async move { inner.predict(&owned).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut task).await {
            Err(_) => {
                task.abort();
                PredictionOutcome::Unavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
            Ok(Err(join_err)) => {
                PredictionOutcome::Unavailable(format!("task failed: {}", join_err))
            }
            Ok(Ok(Err(e))) => PredictionOutcome::Unavailable(e.to_string()),
            Ok(Ok(Ok(p))) if !p.is_valid() => {
                PredictionOutcome::Unavailable(format!("invalid output {:?}", p))
            }
            Ok(Ok(Ok(p))) => PredictionOutcome::Available(p),
        };

        match &outcome {
            PredictionOutcome::Available(p) => debug!(
                address = %candidate.address,
                model = self.inner.name(),
                confidence = p.confidence,
                risk = p.risk_score,
                "Prediction available"
            ),
            PredictionOutcome::Unavailable(reason) => warn!(
                address = %candidate.address,
                model = self.inner.name(),
                "Prediction unavailable, deciding without it: {}",
                reason
            ),
        }
        outcome
    }
}

/// Rule-based fallback model.
///
/// Low confidence by construction; it only nudges decisions.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPredictor;

impl HeuristicPredictor {
    const CONFIDENCE: f64 = 0.3;

    pub fn estimate(&self, candidate: &Candidate) -> Prediction {
        let mut expected = 0.0;
        let mut risk: f64 = 0.5;

        if candidate.liquidity_usd >= 50_000.0 {
            expected += 20.0;
            risk -= 0.1;
        } else if candidate.liquidity_usd < 10_000.0 {
            risk += 0.15;
        }

        if candidate.top10_pct <= 15.0 {
            expected += 15.0;
            risk -= 0.1;
        } else if candidate.top10_pct >= 25.0 {
            risk += 0.1;
        }

        if candidate.holder_count >= 500 {
            expected += 10.0;
            risk -= 0.05;
        } else if candidate.holder_count < 100 {
            risk += 0.1;
        }

        if candidate.volume_liquidity_ratio() >= 0.5 {
            expected += 10.0;
        }

        Prediction {
            expected_return_pct: expected,
            confidence: Self::CONFIDENCE,
            risk_score: risk.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Predictor for HeuristicPredictor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn predict(&self, candidate: &Candidate) -> Result<Prediction> {
        Ok(self.estimate(candidate))
    }
}

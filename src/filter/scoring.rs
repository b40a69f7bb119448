//! Weighted opportunity scoring
//!
//! Each component maps one raw attribute onto 0..=100 through a
//! piecewise-linear curve; the final score is the weighted sum of the
//! components. Scoring holds no state between calls, so identical input and
//! configuration always produce the same score.

use serde::{Deserialize, Serialize};

use crate::filter::admission::Admitted;
use crate::filter::types::ScoreResult;

/// Piecewise-linear mapping from a raw value to a 0..=100 sub-score.
///
/// Points are `(x, y)` pairs sorted by ascending `x`. Values left of the first
/// point take the first `y`, values right of the last point take the last `y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve(pub Vec<(f64, f64)>);

impl Curve {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self(points)
    }

    /// Evaluate the curve at `x`
    pub fn eval(&self, x: f64) -> f64 {
        let points = &self.0;
        let (first, last) = match (points.first(), points.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return 0.0,
        };

        if x.is_nan() || x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }

        for pair in points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x <= x1 {
                let t = (x - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }

        last.1
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.0.is_empty() {
            return Err(format!("{} curve has no points", name));
        }
        for (x, y) in &self.0 {
            if !(0.0..=100.0).contains(y) || x.is_nan() {
                return Err(format!("{} curve point ({}, {}) out of range", name, x, y));
            }
        }
        if self.0.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(format!("{} curve x values must be strictly ascending", name));
        }
        Ok(())
    }
}

/// Component weights; must sum to 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub liquidity: f64,
    pub holders: f64,
    pub distribution: f64,
    pub volume: f64,
    pub freshness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.20,
            holders: 0.20,
            distribution: 0.25,
            volume: 0.15,
            freshness: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.liquidity + self.holders + self.distribution + self.volume + self.freshness
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Liquidity in USD
    #[serde(default = "default_liquidity_curve")]
    pub liquidity_curve: Curve,
    /// Holder count
    #[serde(default = "default_holders_curve")]
    pub holders_curve: Curve,
    /// Top-10 holder share in percent (lower is better)
    #[serde(default = "default_distribution_curve")]
    pub distribution_curve: Curve,
    /// Volume / liquidity ratio
    #[serde(default = "default_volume_curve")]
    pub volume_curve: Curve,
    /// Age in seconds
    #[serde(default = "default_freshness_curve")]
    pub freshness_curve: Curve,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            liquidity_curve: default_liquidity_curve(),
            holders_curve: default_holders_curve(),
            distribution_curve: default_distribution_curve(),
            volume_curve: default_volume_curve(),
            freshness_curve: default_freshness_curve(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        let w = &self.weights;
        if [w.liquidity, w.holders, w.distribution, w.volume, w.freshness]
            .iter()
            .any(|v| *v < 0.0)
        {
            return Err("weights cannot be negative".into());
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(format!("weights must sum to 1.0, got {:.4}", w.sum()));
        }
        self.liquidity_curve.validate("liquidity")?;
        self.holders_curve.validate("holders")?;
        self.distribution_curve.validate("distribution")?;
        self.volume_curve.validate("volume")?;
        self.freshness_curve.validate("freshness")?;
        Ok(())
    }
}

fn default_liquidity_curve() -> Curve {
    // Sweet spot 20k-100k, fading toward the 500k ceiling
    Curve::new(vec![
        (0.0, 0.0),
        (5_000.0, 40.0),
        (10_000.0, 70.0),
        (20_000.0, 100.0),
        (100_000.0, 100.0),
        (200_000.0, 60.0),
        (500_000.0, 20.0),
    ])
}

fn default_holders_curve() -> Curve {
    Curve::new(vec![
        (0.0, 0.0),
        (50.0, 40.0),
        (100.0, 90.0),
        (1_000.0, 100.0),
        (2_000.0, 60.0),
        (5_000.0, 20.0),
    ])
}

fn default_distribution_curve() -> Curve {
    Curve::new(vec![
        (0.0, 100.0),
        (20.0, 100.0),
        (30.0, 70.0),
        (40.0, 40.0),
        (60.0, 0.0),
    ])
}

fn default_volume_curve() -> Curve {
    Curve::new(vec![(0.0, 0.0), (0.2, 50.0), (0.5, 100.0)])
}

fn default_freshness_curve() -> Curve {
    Curve::new(vec![
        (0.0, 60.0),
        (30.0, 100.0),
        (300.0, 100.0),
        (600.0, 50.0),
        (1_800.0, 0.0),
    ])
}

/// Per-component sub-scores, 0..=100 each
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub liquidity: f64,
    pub holders: f64,
    pub distribution: f64,
    pub volume: f64,
    pub freshness: f64,
}

/// Deterministic weighted scorer
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Compute component sub-scores
    pub fn breakdown(&self, admitted: &Admitted) -> ScoreBreakdown {
        let c = admitted.candidate();
        ScoreBreakdown {
            liquidity: self.config.liquidity_curve.eval(c.liquidity_usd),
            holders: self.config.holders_curve.eval(c.holder_count as f64),
            distribution: self.config.distribution_curve.eval(c.top10_pct),
            volume: self.config.volume_curve.eval(c.volume_liquidity_ratio()),
            freshness: self.config.freshness_curve.eval(c.age_seconds as f64),
        }
    }

    /// Score an admitted candidate
    pub fn score(&self, admitted: &Admitted) -> ScoreResult {
        let b = self.breakdown(admitted);
        let w = &self.config.weights;

        let score = (b.liquidity * w.liquidity
            + b.holders * w.holders
            + b.distribution * w.distribution
            + b.volume * w.volume
            + b.freshness * w.freshness)
            .clamp(0.0, 100.0);

        ScoreResult {
            address: admitted.candidate().address.clone(),
            score,
            passed_gates: true,
            reasons: vec![
                format!("liquidity {:.1}", b.liquidity),
                format!("holders {:.1}", b.holders),
                format!("distribution {:.1}", b.distribution),
                format!("volume {:.1}", b.volume),
                format!("freshness {:.1}", b.freshness),
            ],
        }
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

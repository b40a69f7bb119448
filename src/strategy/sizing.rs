//! Position sizing
//!
//! Bet bigger on high scores, smaller on speculative ones.
//! `size = base * score_multiplier * confidence_multiplier`, clamped to the
//! configured `[min, max]` range.

use serde::{Deserialize, Serialize};

/// One score tier: scores at or above `min_score` use `multiplier`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTier {
    pub min_score: f64,
    pub multiplier: f64,
}

/// Position sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSizingConfig {
    pub base_size_sol: f64,
    pub min_size_sol: f64,
    pub max_size_sol: f64,
    /// Highest matching tier wins
    pub score_tiers: Vec<ScoreTier>,
    /// Multiplier for scores below every tier
    pub floor_multiplier: f64,
    /// Scale by prediction confidence when a prediction is available
    pub confidence_scaling: bool,
}

impl Default for PositionSizingConfig {
    fn default() -> Self {
        Self {
            base_size_sol: 0.05,
            min_size_sol: 0.01,
            max_size_sol: 0.5,
            score_tiers: vec![
                ScoreTier { min_score: 90.0, multiplier: 3.0 },
                ScoreTier { min_score: 80.0, multiplier: 2.0 },
                ScoreTier { min_score: 70.0, multiplier: 1.0 },
            ],
            floor_multiplier: 0.5,
            confidence_scaling: true,
        }
    }
}

impl PositionSizingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_size_sol <= 0.0 {
            return Err("base_size_sol must be positive".into());
        }
        if self.min_size_sol <= 0.0 || self.min_size_sol > self.max_size_sol {
            return Err(format!(
                "size range [{}, {}] is invalid",
                self.min_size_sol, self.max_size_sol
            ));
        }
        if self.floor_multiplier < 0.0 || self.score_tiers.iter().any(|t| t.multiplier < 0.0) {
            return Err("multipliers cannot be negative".into());
        }
        Ok(())
    }
}

/// Position sizer
pub struct PositionSizer {
    config: PositionSizingConfig,
}

impl PositionSizer {
    pub fn new(config: PositionSizingConfig) -> Self {
        Self { config }
    }

    /// Multiplier for a score, from the highest tier it reaches
    pub fn score_multiplier(&self, score: f64) -> f64 {
        self.config
            .score_tiers
            .iter()
            .filter(|t| score >= t.min_score)
            .max_by(|a, b| a.min_score.total_cmp(&b.min_score))
            .map(|t| t.multiplier)
            .unwrap_or(self.config.floor_multiplier)
    }

    /// Multiplier for prediction confidence (0.5x at 0, 2.0x at 1)
    pub fn confidence_multiplier(&self, confidence: Option<f64>) -> f64 {
        match confidence {
            Some(c) if self.config.confidence_scaling => 0.5 + c.clamp(0.0, 1.0) * 1.5,
            _ => 1.0,
        }
    }

    /// Combined sizing multiplier
    pub fn sizing_multiplier(&self, score: f64, confidence: Option<f64>) -> f64 {
        self.score_multiplier(score) * self.confidence_multiplier(confidence)
    }

    /// Position size in SOL, always within `[min_size_sol, max_size_sol]`
    pub fn size(&self, score: f64, confidence: Option<f64>) -> f64 {
        let size = self.config.base_size_sol * self.sizing_multiplier(score, confidence);
        size.clamp(self.config.min_size_sol, self.config.max_size_sol)
    }

    pub fn config(&self) -> &PositionSizingConfig {
        &self.config
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(PositionSizingConfig::default())
    }
}

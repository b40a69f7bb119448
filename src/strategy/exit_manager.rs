//! Exit Manager
//!
//! Exit trigger evaluation for one position at one price. Triggers are
//! checked in strict priority order and only the first match is returned:
//!
//! 1. hard stop-loss
//! 2. trailing stop (once armed)
//! 3. take-profit ladder (first unhit level reached)
//! 4. max hold time
//!
//! Evaluation is pure; the position manager applies the result once the exit
//! is confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::types::Position;

/// Remaining fractions at or below this are treated as fully closed
pub const FRACTION_EPSILON: f64 = 1e-9;

/// One take-profit step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderLevel {
    /// Price multiple of entry, e.g. 2.0 for a 2x
    pub multiplier: f64,
    /// Fraction of the original position to sell
    pub fraction: f64,
}

/// Exit configuration. Percentages are fractions (0.15 = 15%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Gain from entry that arms the trailing stop
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,
    /// Drawdown from peak that triggers the trailing stop
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: f64,
    #[serde(default = "default_ladder")]
    pub ladder: Vec<LadderLevel>,
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Consecutive failed exits before a position is flagged
    #[serde(default = "default_exit_failure_warn_threshold")]
    pub exit_failure_warn_threshold: u32,
}

fn default_stop_loss_pct() -> f64 {
    0.15
}

fn default_trailing_activation_pct() -> f64 {
    0.5
}

fn default_trailing_pct() -> f64 {
    0.20
}

fn default_ladder() -> Vec<LadderLevel> {
    vec![
        LadderLevel { multiplier: 1.5, fraction: 0.25 },
        LadderLevel { multiplier: 2.0, fraction: 0.25 },
        LadderLevel { multiplier: 3.0, fraction: 0.25 },
        LadderLevel { multiplier: 5.0, fraction: 0.15 },
    ]
}

fn default_max_hold_secs() -> u64 {
    3_600
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_exit_failure_warn_threshold() -> u32 {
    3
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            trailing_activation_pct: default_trailing_activation_pct(),
            trailing_pct: default_trailing_pct(),
            ladder: default_ladder(),
            max_hold_secs: default_max_hold_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            exit_failure_warn_threshold: default_exit_failure_warn_threshold(),
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err("stop_loss_pct must be within (0, 1)".into());
        }
        if !(self.trailing_pct > 0.0 && self.trailing_pct < 1.0) {
            return Err("trailing_pct must be within (0, 1)".into());
        }
        if self.trailing_activation_pct <= 0.0 {
            return Err("trailing_activation_pct must be positive".into());
        }
        if self
            .ladder
            .iter()
            .any(|l| l.multiplier <= 1.0 || l.fraction <= 0.0 || l.fraction > 1.0)
        {
            return Err("ladder levels need multiplier > 1 and fraction in (0, 1]".into());
        }
        if self.ladder.windows(2).any(|w| w[1].multiplier <= w[0].multiplier) {
            return Err("ladder multipliers must be strictly ascending".into());
        }
        let total: f64 = self.ladder.iter().map(|l| l.fraction).sum();
        if total > 1.0 + FRACTION_EPSILON {
            return Err(format!("ladder fractions sum to {:.3}, above 1.0", total));
        }
        if self.max_hold_secs == 0 {
            return Err("max_hold_secs must be positive".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be positive".into());
        }
        Ok(())
    }
}

/// Why a position is being exited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitTrigger {
    StopLoss,
    TrailingStop { peak_price: f64 },
    TakeProfit { level: usize, multiplier: f64 },
    MaxHoldTime { held_secs: i64 },
}

impl std::fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitTrigger::StopLoss => write!(f, "stop-loss"),
            ExitTrigger::TrailingStop { peak_price } => {
                write!(f, "trailing stop (peak {:.9})", peak_price)
            }
            ExitTrigger::TakeProfit { level, multiplier } => {
                write!(f, "take-profit level {} ({}x)", level, multiplier)
            }
            ExitTrigger::MaxHoldTime { held_secs } => write!(f, "max hold ({}s)", held_secs),
        }
    }
}

/// Exit to submit
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub trigger: ExitTrigger,
    /// Fraction of the original position to sell
    pub fraction: f64,
    /// Price the trigger was evaluated at
    pub price: f64,
}

/// Exit manager
#[derive(Debug, Clone)]
pub struct ExitManager {
    config: ExitConfig,
}

impl ExitManager {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Price at or below which the stop-loss fires
    pub fn stop_price(&self, position: &Position) -> f64 {
        position.entry_price * (1.0 - self.config.stop_loss_pct)
    }

    /// Price at or below which the armed trailing stop fires
    pub fn trailing_stop_price(&self, position: &Position) -> f64 {
        position.peak_price * (1.0 - self.config.trailing_pct)
    }

    /// First matching trigger for `position` at `price`.
    ///
    /// Expects the position to have observed `price` already, so that peak
    /// and arming reflect it.
    pub fn evaluate(
        &self,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<ExitSignal> {
        let remaining = position.filled_fraction;
        if remaining <= FRACTION_EPSILON {
            return None;
        }

        if price <= self.stop_price(position) {
            return Some(ExitSignal {
                trigger: ExitTrigger::StopLoss,
                fraction: remaining,
                price,
            });
        }

        if position.trailing_armed && price <= self.trailing_stop_price(position) {
            return Some(ExitSignal {
                trigger: ExitTrigger::TrailingStop {
                    peak_price: position.peak_price,
                },
                fraction: remaining,
                price,
            });
        }

        let reached = self.config.ladder.iter().enumerate().find(|(i, level)| {
            !position.exit_levels_hit.contains(i)
                && price >= position.entry_price * level.multiplier
        });
        if let Some((level, step)) = reached {
            return Some(ExitSignal {
                trigger: ExitTrigger::TakeProfit {
                    level,
                    multiplier: step.multiplier,
                },
                fraction: step.fraction.min(remaining),
                price,
            });
        }

        let held_secs = (now - position.opened_at).num_seconds();
        if held_secs >= self.config.max_hold_secs as i64 {
            return Some(ExitSignal {
                trigger: ExitTrigger::MaxHoldTime { held_secs },
                fraction: remaining,
                price,
            });
        }

        None
    }
}

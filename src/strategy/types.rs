//! Shared types for the decision layer

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::trading::types::TradeIntent;

/// Trading mode; each mode carries its own thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Conservative,
    Balanced,
    Aggressive,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Balanced
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Conservative => write!(f, "conservative"),
            Mode::Balanced => write!(f, "balanced"),
            Mode::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Mode::Conservative),
            "balanced" => Ok(Mode::Balanced),
            "aggressive" => Ok(Mode::Aggressive),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

impl Mode {
    fn as_u8(self) -> u8 {
        match self {
            Mode::Conservative => 0,
            Mode::Balanced => 1,
            Mode::Aggressive => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Mode::Conservative,
            2 => Mode::Aggressive,
            _ => Mode::Balanced,
        }
    }
}

/// Thresholds applied in one mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeThresholds {
    /// Minimum opportunity score (0..=100)
    pub min_score: f64,
    /// Minimum prediction confidence (0..=1), only checked when a prediction exists
    pub min_confidence: f64,
    /// Maximum prediction risk (0..=1), only checked when a prediction exists
    pub max_risk: f64,
}

impl ModeThresholds {
    fn validate(&self, mode: Mode) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.min_score) {
            return Err(format!("{}: min_score must be within 0..=100", mode));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!("{}: min_confidence must be within 0..=1", mode));
        }
        if !(0.0..=1.0).contains(&self.max_risk) {
            return Err(format!("{}: max_risk must be within 0..=1", mode));
        }
        Ok(())
    }
}

/// Per-mode threshold table.
///
/// Each mode has its own defaults, so a partial override of one mode only
/// replaces the fields it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModeTableOverrides")]
pub struct ModeTable {
    pub conservative: ModeThresholds,
    pub balanced: ModeThresholds,
    pub aggressive: ModeThresholds,
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            conservative: ModeThresholds {
                min_score: 85.0,
                min_confidence: 0.7,
                max_risk: 0.2,
            },
            balanced: ModeThresholds {
                min_score: 70.0,
                min_confidence: 0.5,
                max_risk: 0.4,
            },
            aggressive: ModeThresholds {
                min_score: 60.0,
                min_confidence: 0.3,
                max_risk: 0.6,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdOverrides {
    min_score: Option<f64>,
    min_confidence: Option<f64>,
    max_risk: Option<f64>,
}

impl ThresholdOverrides {
    fn apply(self, base: ModeThresholds) -> ModeThresholds {
        ModeThresholds {
            min_score: self.min_score.unwrap_or(base.min_score),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            max_risk: self.max_risk.unwrap_or(base.max_risk),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeTableOverrides {
    conservative: ThresholdOverrides,
    balanced: ThresholdOverrides,
    aggressive: ThresholdOverrides,
}

impl From<ModeTableOverrides> for ModeTable {
    fn from(overrides: ModeTableOverrides) -> Self {
        let defaults = ModeTable::default();
        Self {
            conservative: overrides.conservative.apply(defaults.conservative),
            balanced: overrides.balanced.apply(defaults.balanced),
            aggressive: overrides.aggressive.apply(defaults.aggressive),
        }
    }
}

impl ModeTable {
    pub fn get(&self, mode: Mode) -> &ModeThresholds {
        match mode {
            Mode::Conservative => &self.conservative,
            Mode::Balanced => &self.balanced,
            Mode::Aggressive => &self.aggressive,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.conservative.validate(Mode::Conservative)?;
        self.balanced.validate(Mode::Balanced)?;
        self.aggressive.validate(Mode::Aggressive)
    }
}

/// Active mode, switchable at runtime.
///
/// Readers load the mode once per evaluation, so a switch never lands
/// halfway through a decision.
#[derive(Debug)]
pub struct ModeSelector(AtomicU8);

impl ModeSelector {
    pub fn new(mode: Mode) -> Self {
        Self(AtomicU8::new(mode.as_u8()))
    }

    pub fn get(&self) -> Mode {
        Mode::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Switch mode, returning the previous one
    pub fn set(&self, mode: Mode) -> Mode {
        Mode::from_u8(self.0.swap(mode.as_u8(), Ordering::AcqRel))
    }
}

/// Why a candidate was skipped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A position is already open for this address
    AlreadyHolding,
    MaxPositionsReached { current: usize, max: usize },
    DailyCapReached { spent_sol: f64, cap_sol: f64 },
    ScoreBelowThreshold { score: f64, threshold: f64 },
    RiskTooHigh { risk: f64, max: f64 },
    ConfidenceTooLow { confidence: f64, min: f64 },
    /// An execution for this address is already in flight
    ExecutionInFlight,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyHolding => write!(f, "position already open"),
            SkipReason::MaxPositionsReached { current, max } => {
                write!(f, "max positions reached: {}/{}", current, max)
            }
            SkipReason::DailyCapReached { spent_sol, cap_sol } => {
                write!(f, "daily cap reached: {:.3}/{:.3} SOL", spent_sol, cap_sol)
            }
            SkipReason::ScoreBelowThreshold { score, threshold } => {
                write!(f, "score {:.1} below {:.1}", score, threshold)
            }
            SkipReason::RiskTooHigh { risk, max } => {
                write!(f, "predicted risk {:.2} above {:.2}", risk, max)
            }
            SkipReason::ConfidenceTooLow { confidence, min } => {
                write!(f, "prediction confidence {:.2} below {:.2}", confidence, min)
            }
            SkipReason::ExecutionInFlight => write!(f, "execution already in flight"),
        }
    }
}

/// Decision engine output
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Submit the intent automatically
    Execute(TradeIntent),
    /// Surface the intent for manual confirmation
    Alert(TradeIntent),
    Skip(SkipReason),
}

impl Decision {
    pub fn intent(&self) -> Option<&TradeIntent> {
        match self {
            Decision::Execute(intent) | Decision::Alert(intent) => Some(intent),
            Decision::Skip(_) => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Decision::Skip(_))
    }
}

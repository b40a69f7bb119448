//! Decision and exit strategy
//!
//! ## Entry
//! - `engine` - Execute/Alert/Skip decisions
//! - `portfolio_risk` - Admission ledger (concurrent positions, daily spend)
//! - `sizing` - Score and confidence based position sizing
//! - `predictor` - Optional prediction capability with timeout isolation
//!
//! ## Exit
//! - `exit_manager` - Stop-loss, trailing stop, take-profit ladder, max hold
//! - `learning` - Fire-and-forget outcome reporting on close

// Shared types
pub mod types;

pub mod engine;
pub mod exit_manager;
pub mod learning;
pub mod portfolio_risk;
pub mod predictor;
pub mod sizing;

// Re-exports
pub use engine::{DecisionEngine, DecisionInput};
pub use exit_manager::{ExitConfig, ExitManager, ExitSignal, ExitTrigger, LadderLevel};
pub use learning::{report_outcome, LearningSink, TradeOutcome};
pub use portfolio_risk::{
    AdmissionLedger, AdmissionLimits, AdmissionState, PortfolioBlock, Reservation,
};
pub use predictor::{GuardedPredictor, HeuristicPredictor, Prediction, PredictionOutcome, Predictor};
pub use sizing::{PositionSizer, PositionSizingConfig, ScoreTier};
pub use types::*;

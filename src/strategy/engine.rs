//! Decision Engine
//!
//! Turns a scored candidate (plus an optional prediction) into Execute, Alert
//! or Skip. Rules are applied in a fixed order and the first match wins:
//!
//! 1. an open position already exists for the address
//! 2. portfolio caps (open positions, daily spend)
//! 3. score below the mode threshold
//! 4. predicted risk above the mode maximum
//! 5. prediction confidence below the mode minimum
//!
//! Everything else is sized and becomes Execute when auto-buy is on, Alert
//! otherwise. [`DecisionEngine::decide`] is pure; committing the buy against
//! the admission ledger is a separate, atomic step.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::DecisionConfig;
use crate::filter::types::ScoreResult;
use crate::trading::types::TradeIntent;

use super::portfolio_risk::{
    AdmissionLedger, AdmissionLimits, AdmissionState, PortfolioBlock, Reservation,
};
use super::predictor::Prediction;
use super::sizing::PositionSizer;
use super::types::{Decision, Mode, ModeSelector, ModeTable, SkipReason};

impl From<PortfolioBlock> for SkipReason {
    fn from(block: PortfolioBlock) -> Self {
        match block {
            PortfolioBlock::MaxPositionsReached { current, max } => {
                SkipReason::MaxPositionsReached { current, max }
            }
            PortfolioBlock::DailyCapReached { spent_sol, cap_sol } => {
                SkipReason::DailyCapReached { spent_sol, cap_sol }
            }
        }
    }
}

/// Everything one decision depends on
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub score: &'a ScoreResult,
    pub prediction: Option<&'a Prediction>,
    pub admission: AdmissionState,
    pub already_holding: bool,
    pub mode: Mode,
    /// Execute qualifying candidates instead of alerting
    pub auto_buy: bool,
}

/// Decision engine
pub struct DecisionEngine {
    auto_buy: AtomicBool,
    modes: ModeTable,
    sizer: PositionSizer,
    limits: AdmissionLimits,
    ledger: Arc<AdmissionLedger>,
    mode: Arc<ModeSelector>,
}

impl DecisionEngine {
    pub fn new(
        config: &DecisionConfig,
        ledger: Arc<AdmissionLedger>,
        mode: Arc<ModeSelector>,
    ) -> Self {
        Self {
            auto_buy: AtomicBool::new(config.auto_buy_enabled),
            modes: config.modes.clone(),
            sizer: PositionSizer::new(config.sizing.clone()),
            limits: ledger.limits(),
            ledger,
            mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    pub fn ledger(&self) -> &Arc<AdmissionLedger> {
        &self.ledger
    }

    pub fn auto_buy_enabled(&self) -> bool {
        self.auto_buy.load(Ordering::Acquire)
    }

    /// Toggle auto-buy, returning the previous setting. Applies from the next
    /// evaluation.
    pub fn set_auto_buy(&self, enabled: bool) -> bool {
        self.auto_buy.swap(enabled, Ordering::AcqRel)
    }

    /// Apply the decision rules to a fixed set of inputs
    pub fn decide(&self, input: &DecisionInput<'_>) -> Decision {
        if input.already_holding {
            return Decision::Skip(SkipReason::AlreadyHolding);
        }

        if let Err(block) = self.limits.check(&input.admission) {
            return Decision::Skip(block.into());
        }

        let thresholds = self.modes.get(input.mode);
        let score = input.score.score;
        if score < thresholds.min_score {
            return Decision::Skip(SkipReason::ScoreBelowThreshold {
                score,
                threshold: thresholds.min_score,
            });
        }

        if let Some(p) = input.prediction {
            if p.risk_score > thresholds.max_risk {
                return Decision::Skip(SkipReason::RiskTooHigh {
                    risk: p.risk_score,
                    max: thresholds.max_risk,
                });
            }
            if p.confidence < thresholds.min_confidence {
                return Decision::Skip(SkipReason::ConfidenceTooLow {
                    confidence: p.confidence,
                    min: thresholds.min_confidence,
                });
            }
        }

        let confidence = input.prediction.map(|p| p.confidence);
        let size_sol = self.sizer.size(score, confidence);
        let reason = match input.prediction {
            Some(p) => format!(
                "score {:.1}, expected {:+.1}% at confidence {:.2} ({})",
                score, p.expected_return_pct, p.confidence, input.mode
            ),
            None => format!("score {:.1} ({})", score, input.mode),
        };
        let intent = TradeIntent::buy(&input.score.address, size_sol, reason, input.mode);

        if input.auto_buy {
            Decision::Execute(intent)
        } else {
            Decision::Alert(intent)
        }
    }

    /// Cheap pre-check before asking the predictor
    pub fn precheck(&self, already_holding: bool, now: DateTime<Utc>) -> Option<SkipReason> {
        if already_holding {
            return Some(SkipReason::AlreadyHolding);
        }
        self.limits
            .check(&self.ledger.snapshot(now))
            .err()
            .map(SkipReason::from)
    }

    /// Decide against the current mode and ledger state
    pub fn evaluate(
        &self,
        score: &ScoreResult,
        prediction: Option<&Prediction>,
        already_holding: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        let input = DecisionInput {
            score,
            prediction,
            admission: self.ledger.snapshot(now),
            already_holding,
            mode: self.mode.get(),
            auto_buy: self.auto_buy_enabled(),
        };
        let decision = self.decide(&input);
        debug!(
            address = %score.address,
            score = score.score,
            mode = %input.mode,
            ?decision,
            "Decision"
        );
        decision
    }

    /// Commit a buy intent against the caps.
    ///
    /// The caps are re-checked under the ledger lock, so an intent that passed
    /// [`decide`](Self::decide) can still be refused here if another worker
    /// committed first.
    pub fn commit(
        &self,
        intent: &TradeIntent,
        now: DateTime<Utc>,
    ) -> Result<Reservation, SkipReason> {
        self.ledger
            .try_reserve(intent.size_sol, now)
            .map_err(SkipReason::from)
    }

    /// Return the reservation of a buy that failed terminally
    pub fn refund(&self, reservation: Reservation, now: DateTime<Utc>) {
        self.ledger.refund(reservation, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::filter::admission::AdmissionFilter;
    use crate::filter::scoring::Scorer;
    use crate::test_support::candidate;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn engine_with(config: DecisionConfig) -> DecisionEngine {
        let limits = AdmissionLimits {
            max_concurrent_positions: config.max_concurrent_positions,
            daily_cap_sol: config.daily_cap_sol,
        };
        let ledger = Arc::new(AdmissionLedger::new(limits, noon()));
        let mode = Arc::new(ModeSelector::new(config.mode));
        DecisionEngine::new(&config, ledger, mode)
    }

    fn auto_engine() -> DecisionEngine {
        let mut config = DecisionConfig::default();
        config.auto_buy_enabled = true;
        engine_with(config)
    }

    fn score(value: f64) -> ScoreResult {
        ScoreResult {
            address: "Mint111".into(),
            score: value,
            passed_gates: true,
            reasons: vec![],
        }
    }

    fn input<'a>(
        score: &'a ScoreResult,
        prediction: Option<&'a Prediction>,
        mode: Mode,
    ) -> DecisionInput<'a> {
        DecisionInput {
            score,
            prediction,
            admission: AdmissionState::default(),
            already_holding: false,
            mode,
            auto_buy: true,
        }
    }

    #[test]
    fn test_reference_candidate_executes_in_balanced_mode() {
        let admitted = AdmissionFilter::new(FilterConfig::default())
            .admit(candidate("Mint111"))
            .unwrap();
        let result = Scorer::default().score(&admitted);
        assert!(result.score >= 70.0);

        let engine = auto_engine();
        let sizing = DecisionConfig::default().sizing;
        match engine.decide(&input(&result, None, Mode::Balanced)) {
            Decision::Execute(intent) => {
                assert!(intent.size_sol >= sizing.min_size_sol);
                assert!(intent.size_sol <= sizing.max_size_sol);
                assert_eq!(intent.mode, Mode::Balanced);
            }
            other => panic!("expected execute, got {:?}", other),
        }
    }

    #[test]
    fn test_alert_when_auto_buy_disabled() {
        let engine = auto_engine();
        let s = score(85.0);
        let mut i = input(&s, None, Mode::Balanced);
        i.auto_buy = false;
        assert!(matches!(engine.decide(&i), Decision::Alert(_)));
    }

    #[test]
    fn test_auto_buy_toggled_at_runtime() {
        let engine = engine_with(DecisionConfig::default());
        let s = score(85.0);
        assert!(matches!(
            engine.evaluate(&s, None, false, noon()),
            Decision::Alert(_)
        ));

        assert!(!engine.set_auto_buy(true));
        assert!(engine.auto_buy_enabled());
        assert!(matches!(
            engine.evaluate(&s, None, false, noon()),
            Decision::Execute(_)
        ));

        assert!(engine.set_auto_buy(false));
        assert!(matches!(
            engine.evaluate(&s, None, false, noon()),
            Decision::Alert(_)
        ));
    }

    #[test]
    fn test_score_threshold_depends_on_mode() {
        let engine = auto_engine();
        let s = score(75.0);
        assert!(matches!(
            engine.decide(&input(&s, None, Mode::Balanced)),
            Decision::Execute(_)
        ));
        assert_eq!(
            engine.decide(&input(&s, None, Mode::Conservative)),
            Decision::Skip(SkipReason::ScoreBelowThreshold {
                score: 75.0,
                threshold: 85.0
            })
        );
    }

    #[test]
    fn test_prediction_risk_and_confidence() {
        let engine = auto_engine();
        let s = score(80.0);

        let risky = Prediction {
            expected_return_pct: 50.0,
            confidence: 0.9,
            risk_score: 0.7,
        };
        assert!(matches!(
            engine.decide(&input(&s, Some(&risky), Mode::Balanced)),
            Decision::Skip(SkipReason::RiskTooHigh { .. })
        ));

        let unsure = Prediction {
            expected_return_pct: 50.0,
            confidence: 0.2,
            risk_score: 0.1,
        };
        assert!(matches!(
            engine.decide(&input(&s, Some(&unsure), Mode::Balanced)),
            Decision::Skip(SkipReason::ConfidenceTooLow { .. })
        ));

        let good = Prediction {
            expected_return_pct: 50.0,
            confidence: 1.0,
            risk_score: 0.1,
        };
        match engine.decide(&input(&s, Some(&good), Mode::Balanced)) {
            // 0.05 * 2.0 (score tier) * 2.0 (confidence)
            Decision::Execute(intent) => assert!((intent.size_sol - 0.2).abs() < 1e-9),
            other => panic!("expected execute, got {:?}", other),
        }
    }

    #[test]
    fn test_caps_checked_before_score() {
        let engine = auto_engine();
        let s = score(99.0);
        let mut i = input(&s, None, Mode::Aggressive);
        i.admission = AdmissionState {
            open_position_count: 5,
            spent_sol_today: 0.0,
        };
        assert_eq!(
            engine.decide(&i),
            Decision::Skip(SkipReason::MaxPositionsReached { current: 5, max: 5 })
        );

        i.admission = AdmissionState {
            open_position_count: 0,
            spent_sol_today: 2.0,
        };
        assert!(matches!(
            engine.decide(&i),
            Decision::Skip(SkipReason::DailyCapReached { .. })
        ));

        i.admission = AdmissionState::default();
        i.already_holding = true;
        assert_eq!(engine.decide(&i), Decision::Skip(SkipReason::AlreadyHolding));
    }

    #[test]
    fn test_daily_cap_blocks_until_reset() {
        let mut config = DecisionConfig::default();
        config.auto_buy_enabled = true;
        config.daily_cap_sol = 0.1;
        config.max_concurrent_positions = 100;
        let engine = engine_with(config);
        let s = score(75.0);

        let first = engine.evaluate(&s, None, false, noon());
        let intent = first.intent().cloned().unwrap();
        engine.commit(&intent, noon()).unwrap().confirm();
        engine.commit(&intent, noon()).unwrap().confirm();

        let later = noon() + Duration::hours(6);
        assert!(matches!(
            engine.evaluate(&s, None, false, later),
            Decision::Skip(SkipReason::DailyCapReached { .. })
        ));
        assert!(engine.precheck(false, later).is_some());

        let tomorrow = noon() + Duration::hours(13);
        assert!(matches!(
            engine.evaluate(&s, None, false, tomorrow),
            Decision::Execute(_)
        ));
    }

    #[test]
    fn test_commit_rechecks_caps() {
        let mut config = DecisionConfig::default();
        config.auto_buy_enabled = true;
        config.max_concurrent_positions = 1;
        let engine = engine_with(config);
        let s = score(90.0);

        // Two workers decide on the same snapshot
        let a = engine.evaluate(&s, None, false, noon()).intent().cloned().unwrap();
        let b = engine.evaluate(&s, None, false, noon()).intent().cloned().unwrap();

        assert!(engine.commit(&a, noon()).is_ok());
        assert_eq!(
            engine.commit(&b, noon()).unwrap_err(),
            SkipReason::MaxPositionsReached { current: 1, max: 1 }
        );
    }

    #[test]
    fn test_mode_switch_applies_to_next_evaluation() {
        let engine = auto_engine();
        let s = score(65.0);
        assert!(engine.evaluate(&s, None, false, noon()).is_skip());
        engine.mode.set(Mode::Aggressive);
        assert!(!engine.evaluate(&s, None, false, noon()).is_skip());
    }
}

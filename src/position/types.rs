//! Position model
//!
//! A position is created by a confirmed buy and only ever mutated by the
//! position manager. `filled_fraction` never increases, `peak_price` never
//! decreases, and each ladder level is recorded as hit at most once.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::filter::types::Candidate;
use crate::strategy::exit_manager::{ExitTrigger, FRACTION_EPSILON};
use crate::strategy::types::Mode;
use crate::trading::types::{ExecutionReceipt, TradeIntent};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::PartiallyClosed => write!(f, "partially closed"),
            PositionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Exit submitted to the executor and not yet confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrder {
    pub intent: TradeIntent,
    pub trigger: ExitTrigger,
    /// Fraction of the original position being sold
    pub fraction: f64,
    pub trigger_price: f64,
    pub submitted_at: DateTime<Utc>,
}

/// A single position in a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub address: String,
    /// SOL spent on entry
    pub entry_sol: f64,
    /// Entry price in SOL per token
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    /// Remaining share of the original size, 1.0 down to 0.0
    pub filled_fraction: f64,
    /// Ladder indices already taken
    pub exit_levels_hit: BTreeSet<usize>,
    pub peak_price: f64,
    pub trailing_armed: bool,
    pub mode: Mode,
    pub entry_signature: String,
    /// Candidate snapshot the entry was decided on
    pub features: Candidate,
    /// SOL received from confirmed exits so far
    pub realized_sol: f64,
    /// Terminal exit failures since the last confirmed exit
    pub failed_exit_attempts: u32,
    pub pending_exit: Option<ExitOrder>,
    pub last_price: f64,
}

impl Position {
    /// Open a position from a confirmed buy
    pub fn open(features: Candidate, intent: &TradeIntent, receipt: &ExecutionReceipt) -> Self {
        Self {
            address: intent.address.clone(),
            entry_sol: intent.size_sol,
            entry_price: receipt.price,
            opened_at: receipt.filled_at,
            status: PositionStatus::Open,
            filled_fraction: 1.0,
            exit_levels_hit: BTreeSet::new(),
            peak_price: receipt.price,
            trailing_armed: false,
            mode: intent.mode,
            entry_signature: receipt.signature.clone(),
            features,
            realized_sol: 0.0,
            failed_exit_attempts: 0,
            pending_exit: None,
            last_price: receipt.price,
        }
    }

    /// Record a price observation; returns true when this price armed the
    /// trailing stop
    pub fn observe_price(&mut self, price: f64, trailing_activation_pct: f64) -> bool {
        self.last_price = price;
        if price > self.peak_price {
            self.peak_price = price;
        }
        if !self.trailing_armed && price >= self.entry_price * (1.0 + trailing_activation_pct) {
            self.trailing_armed = true;
            return true;
        }
        false
    }

    /// Apply a confirmed exit of `fraction` (of the original size) filled at
    /// `fill_price`. Returns the fraction actually removed.
    pub fn apply_exit(&mut self, trigger: &ExitTrigger, fraction: f64, fill_price: f64) -> f64 {
        let exited = fraction.clamp(0.0, self.filled_fraction);

        self.filled_fraction -= exited;
        if self.filled_fraction <= FRACTION_EPSILON {
            self.filled_fraction = 0.0;
        }
        if self.entry_price > 0.0 {
            self.realized_sol += self.entry_sol * exited * fill_price / self.entry_price;
        }
        if let ExitTrigger::TakeProfit { level, .. } = trigger {
            self.exit_levels_hit.insert(*level);
        }

        self.status = if self.filled_fraction == 0.0 {
            PositionStatus::Closed
        } else {
            PositionStatus::PartiallyClosed
        };
        exited
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Realized P&L in SOL, counting only exited portions
    pub fn realized_pnl_sol(&self) -> f64 {
        self.realized_sol - self.entry_sol * (1.0 - self.filled_fraction)
    }

    /// Return on the whole entry, once closed
    pub fn realized_return_pct(&self) -> f64 {
        if self.entry_sol == 0.0 {
            return 0.0;
        }
        (self.realized_sol / self.entry_sol - 1.0) * 100.0
    }

    /// Calculate unrealized P&L percentage at the last observed price
    pub fn unrealized_pnl_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.last_price / self.entry_price - 1.0) * 100.0
    }

    pub fn hold_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }
}

/// Daily trading statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_profit_sol: f64,
    pub total_loss_sol: f64,
    pub net_pnl_sol: f64,
}

impl DailyStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            ..Default::default()
        }
    }

    /// Record a closed trade, starting a new day first if the date changed
    pub fn record_trade(&mut self, pnl_sol: f64, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        if today != self.date {
            *self = Self::new(now);
        }

        self.total_trades += 1;
        if pnl_sol >= 0.0 {
            self.winning_trades += 1;
            self.total_profit_sol += pnl_sol;
        } else {
            self.losing_trades += 1;
            self.total_loss_sol += pnl_sol.abs();
        }
        self.net_pnl_sol = self.total_profit_sol - self.total_loss_sol;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / self.total_trades as f64) * 100.0
    }
}

/// Read-only view of open positions, published by the position manager
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: Arc<DashMap<String, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.positions.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<Position> {
        self.positions.get(address).map(|p| p.clone())
    }

    /// All positions, sorted by address
    pub fn all(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.iter().map(|p| p.clone()).collect();
        positions.sort_by(|a, b| a.address.cmp(&b.address));
        positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub(crate) fn publish(&self, position: &Position) {
        self.positions
            .insert(position.address.clone(), position.clone());
    }

    pub(crate) fn remove(&self, address: &str) {
        self.positions.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::position;
    use chrono::TimeZone;

    #[test]
    fn test_partial_then_full_exit() {
        let mut p = position("Mint111", 1.0);
        let tp = ExitTrigger::TakeProfit { level: 0, multiplier: 2.0 };

        assert_eq!(p.apply_exit(&tp, 0.4, 2.0), 0.4);
        assert_eq!(p.status, PositionStatus::PartiallyClosed);
        assert!(p.exit_levels_hit.contains(&0));

        let exited = p.apply_exit(&ExitTrigger::StopLoss, 1.0, 0.5);
        assert!((exited - 0.6).abs() < 1e-12);
        assert_eq!(p.filled_fraction, 0.0);
        assert!(p.is_closed());

        // 0.1 SOL entry: 0.4 sold at 2x, 0.6 sold at 0.5x
        assert!((p.realized_sol - (0.08 + 0.03)).abs() < 1e-12);
        assert!((p.realized_return_pct() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_filled_fraction_never_increases() {
        let mut p = position("Mint111", 1.0);
        p.apply_exit(&ExitTrigger::StopLoss, -0.5, 1.0);
        assert_eq!(p.filled_fraction, 1.0);
        p.apply_exit(&ExitTrigger::StopLoss, 0.3, 1.0);
        assert!((p.filled_fraction - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut p = position("Mint111", 1.0);
        assert!(!p.observe_price(1.3, 0.5));
        assert!(p.observe_price(1.6, 0.5));
        assert!(!p.observe_price(1.1, 0.5));
        assert_eq!(p.peak_price, 1.6);
        assert!(p.trailing_armed);
        assert_eq!(p.last_price, 1.1);
    }

    #[test]
    fn test_daily_stats_roll_over() {
        let day1 = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 6, 2, 1, 0, 0).unwrap();
        let mut stats = DailyStats::new(day1);
        stats.record_trade(0.1, day1);
        stats.record_trade(-0.05, day1);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.win_rate(), 50.0);

        stats.record_trade(0.2, day2);
        assert_eq!(stats.date, "2024-06-02");
        assert_eq!(stats.total_trades, 1);
    }

    #[test]
    fn test_book_publish_and_remove() {
        let p = position("Mint111", 1.0);
        let book = PositionBook::new();
        book.publish(&p);
        assert!(book.contains("Mint111"));
        book.remove("Mint111");
        assert!(book.is_empty());
    }
}

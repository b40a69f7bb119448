//! Portfolio admission ledger
//!
//! Global capital control shared by every worker: committed position slots
//! and SOL spent in the current UTC day. Checking the caps and committing a
//! buy happen under one lock, so concurrent workers can never jointly exceed
//! `max_concurrent_positions` or `daily_cap_sol`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Reasons why new positions are blocked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioBlock {
    /// Maximum number of concurrent positions reached
    MaxPositionsReached { current: usize, max: usize },
    /// Daily spending cap reached
    DailyCapReached { spent_sol: f64, cap_sol: f64 },
}

/// Snapshot of admission state handed to the decision engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AdmissionState {
    /// Open positions plus entries reserved but not yet opened
    pub open_position_count: usize,
    pub spent_sol_today: f64,
}

/// Caps enforced by the ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionLimits {
    pub max_concurrent_positions: usize,
    pub daily_cap_sol: f64,
}

impl AdmissionLimits {
    /// Check a snapshot against the caps
    pub fn check(&self, state: &AdmissionState) -> Result<(), PortfolioBlock> {
        if state.open_position_count >= self.max_concurrent_positions {
            return Err(PortfolioBlock::MaxPositionsReached {
                current: state.open_position_count,
                max: self.max_concurrent_positions,
            });
        }
        if state.spent_sol_today >= self.daily_cap_sol {
            return Err(PortfolioBlock::DailyCapReached {
                spent_sol: state.spent_sol_today,
                cap_sol: self.daily_cap_sol,
            });
        }
        Ok(())
    }
}

/// A committed buy. Either confirmed once the position opens, or refunded
/// when the buy fails terminally.
#[derive(Debug)]
#[must_use = "a reservation must be confirmed or refunded"]
pub struct Reservation {
    size_sol: f64,
    day: NaiveDate,
}

impl Reservation {
    /// The buy filled; the slot now belongs to the open position
    pub fn confirm(self) {}
}

#[derive(Debug)]
struct LedgerState {
    committed_slots: usize,
    spent_sol_today: f64,
    day: NaiveDate,
}

impl LedgerState {
    /// Reset daily spend when the UTC date changes
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            info!(
                previous = %self.day,
                spent_sol = self.spent_sol_today,
                "UTC day rolled over, daily spend reset"
            );
            self.day = today;
            self.spent_sol_today = 0.0;
        }
    }

    fn snapshot(&self) -> AdmissionState {
        AdmissionState {
            open_position_count: self.committed_slots,
            spent_sol_today: self.spent_sol_today,
        }
    }
}

/// Admission ledger
#[derive(Debug)]
pub struct AdmissionLedger {
    limits: AdmissionLimits,
    state: Mutex<LedgerState>,
}

impl AdmissionLedger {
    pub fn new(limits: AdmissionLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            state: Mutex::new(LedgerState {
                committed_slots: 0,
                spent_sol_today: 0.0,
                day: now.date_naive(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.limits
    }

    /// Current state, after applying any day rollover
    pub fn snapshot(&self, now: DateTime<Utc>) -> AdmissionState {
        let mut state = self.lock();
        state.roll(now);
        state.snapshot()
    }

    /// Re-check the caps and commit a buy of `size_sol` atomically
    pub fn try_reserve(
        &self,
        size_sol: f64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, PortfolioBlock> {
        let mut state = self.lock();
        state.roll(now);
        self.limits.check(&state.snapshot())?;

        state.committed_slots += 1;
        state.spent_sol_today += size_sol;
        debug!(
            size_sol,
            slots = state.committed_slots,
            spent_sol = state.spent_sol_today,
            "Reserved entry"
        );

        Ok(Reservation {
            size_sol,
            day: state.day,
        })
    }

    /// Return a reservation whose buy failed terminally.
    ///
    /// Spend is only returned when the reservation belongs to the current
    /// day; yesterday's spend was already reset by the rollover.
    pub fn refund(&self, reservation: Reservation, now: DateTime<Utc>) {
        let mut state = self.lock();
        state.roll(now);
        state.committed_slots = state.committed_slots.saturating_sub(1);
        if reservation.day == state.day {
            state.spent_sol_today = (state.spent_sol_today - reservation.size_sol).max(0.0);
        }
        debug!(size_sol = reservation.size_sol, "Refunded entry reservation");
    }

    /// A position closed; free its slot
    pub fn release_slot(&self) {
        let mut state = self.lock();
        state.committed_slots = state.committed_slots.saturating_sub(1);
    }

    /// Account for positions restored from a snapshot at startup
    pub fn restore_slots(&self, count: usize) {
        let mut state = self.lock();
        state.committed_slots += count;
    }
}

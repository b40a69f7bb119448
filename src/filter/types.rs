//! Candidate types shared by the filter, scorer and dispatch queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw observation delivered by the feed adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUpdate {
    pub address: String,
    pub liquidity_usd: f64,
    pub age_seconds: u64,
    pub holder_count: u32,
    /// Share of supply held by the top 10 holders, in percent
    pub top10_pct: f64,
    pub volume_usd: f64,
    pub lp_locked: bool,
    pub honeypot_flag: bool,
}

/// Immutable candidate snapshot.
///
/// A newer update for the same address produces a new snapshot; snapshots are
/// never mutated. `first_seen_at` is the first time the pipeline observed the
/// address, so it is shared by every snapshot of that address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub address: String,
    pub liquidity_usd: f64,
    pub age_seconds: u64,
    pub holder_count: u32,
    pub top10_pct: f64,
    pub volume_usd: f64,
    pub lp_locked: bool,
    pub honeypot_flag: bool,
    pub first_seen_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

impl Candidate {
    /// Snapshot a feed update
    pub fn from_update(
        update: CandidateUpdate,
        first_seen_at: DateTime<Utc>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: update.address,
            liquidity_usd: update.liquidity_usd,
            age_seconds: update.age_seconds,
            holder_count: update.holder_count,
            top10_pct: update.top10_pct,
            volume_usd: update.volume_usd,
            lp_locked: update.lp_locked,
            honeypot_flag: update.honeypot_flag,
            first_seen_at,
            observed_at,
        }
    }

    /// Volume relative to liquidity (0 when there is no liquidity)
    pub fn volume_liquidity_ratio(&self) -> f64 {
        if self.liquidity_usd <= 0.0 {
            return 0.0;
        }
        self.volume_usd / self.liquidity_usd
    }
}

/// Output of the scorer for one snapshot.
///
/// Only produced for candidates that passed admission, and never persisted
/// beyond the evaluation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub address: String,
    /// Opportunity score, 0..=100
    pub score: f64,
    pub passed_gates: bool,
    /// Per-component breakdown for observability
    pub reasons: Vec<String>,
}

/// A scored snapshot travelling through the dispatch queue
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: ScoreResult,
}

impl ScoredCandidate {
    pub fn address(&self) -> &str {
        &self.candidate.address
    }
}

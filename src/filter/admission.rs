//! Admission gates
//!
//! Hard pass/fail checks on a candidate's raw attributes. Candidates that
//! fail any gate are dropped before scoring; the only way to obtain an
//! [`Admitted`] candidate (which the scorer requires) is through
//! [`AdmissionFilter::admit`].

use std::collections::HashSet;
use tracing::debug;

use crate::config::FilterConfig;
use crate::filter::types::Candidate;

/// Reason why a candidate was filtered
#[derive(Debug, Clone, PartialEq)]
pub enum FilterReason {
    /// Address is on the blocklist (base assets, stablecoins)
    Blocklisted,
    /// Liquidity outside the configured range
    LiquidityOutOfRange(f64),
    /// Age outside the configured range
    AgeOutOfRange(u64),
    /// Holder count outside the configured range
    HoldersOutOfRange(u32),
    /// Top-10 holder share above maximum
    ConcentrationTooHigh(f64),
    /// LP tokens are not locked
    LpNotLocked,
    /// Flagged as honeypot
    Honeypot,
    /// Volume below floor after the grace period
    VolumeBelowMinimum(f64),
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::Blocklisted => write!(f, "address is blocklisted"),
            FilterReason::LiquidityOutOfRange(usd) => {
                write!(f, "liquidity ${:.0} outside allowed range", usd)
            }
            FilterReason::AgeOutOfRange(secs) => write!(f, "age {}s outside allowed range", secs),
            FilterReason::HoldersOutOfRange(count) => {
                write!(f, "{} holders outside allowed range", count)
            }
            FilterReason::ConcentrationTooHigh(pct) => {
                write!(f, "top 10 holders own {:.1}% (too concentrated)", pct)
            }
            FilterReason::LpNotLocked => write!(f, "LP not locked"),
            FilterReason::Honeypot => write!(f, "honeypot flagged"),
            FilterReason::VolumeBelowMinimum(usd) => {
                write!(f, "volume ${:.0} below minimum", usd)
            }
        }
    }
}

/// Filter result
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    /// Candidate passed all gates
    Pass,
    /// Candidate was filtered (first failing gate)
    Filtered(FilterReason),
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }
}

/// A candidate that passed every admission gate
#[derive(Debug, Clone)]
pub struct Admitted(Candidate);

impl Admitted {
    pub fn candidate(&self) -> &Candidate {
        &self.0
    }

    pub fn into_candidate(self) -> Candidate {
        self.0
    }
}

/// Admission filter built from configuration
pub struct AdmissionFilter {
    config: FilterConfig,
    blocked: HashSet<String>,
}

impl AdmissionFilter {
    /// Create a new admission filter from config
    pub fn new(config: FilterConfig) -> Self {
        let blocked = config.blocked_addresses.iter().cloned().collect();
        Self { config, blocked }
    }

    /// Run every gate; returns the first failing reason
    pub fn check(&self, candidate: &Candidate) -> FilterResult {
        let c = &self.config;

        if self.blocked.contains(&candidate.address) {
            return FilterResult::Filtered(FilterReason::Blocklisted);
        }

        if candidate.liquidity_usd < c.min_liquidity_usd
            || candidate.liquidity_usd > c.max_liquidity_usd
            || candidate.liquidity_usd.is_nan()
        {
            return FilterResult::Filtered(FilterReason::LiquidityOutOfRange(
                candidate.liquidity_usd,
            ));
        }

        if candidate.age_seconds < c.min_age_secs || candidate.age_seconds > c.max_age_secs {
            return FilterResult::Filtered(FilterReason::AgeOutOfRange(candidate.age_seconds));
        }

        if candidate.holder_count < c.min_holders || candidate.holder_count > c.max_holders {
            return FilterResult::Filtered(FilterReason::HoldersOutOfRange(
                candidate.holder_count,
            ));
        }

        if candidate.top10_pct > c.max_top10_pct || candidate.top10_pct.is_nan() {
            return FilterResult::Filtered(FilterReason::ConcentrationTooHigh(
                candidate.top10_pct,
            ));
        }

        if c.require_lp_locked && !candidate.lp_locked {
            return FilterResult::Filtered(FilterReason::LpNotLocked);
        }

        if c.reject_honeypot && candidate.honeypot_flag {
            return FilterResult::Filtered(FilterReason::Honeypot);
        }

        if c.min_volume_usd > 0.0
            && candidate.age_seconds > c.volume_grace_secs
            && candidate.volume_usd < c.min_volume_usd
        {
            return FilterResult::Filtered(FilterReason::VolumeBelowMinimum(
                candidate.volume_usd,
            ));
        }

        FilterResult::Pass
    }

    /// Gate a candidate, producing an [`Admitted`] value on success
    pub fn admit(&self, candidate: Candidate) -> Result<Admitted, FilterReason> {
        match self.check(&candidate) {
            FilterResult::Pass => Ok(Admitted(candidate)),
            FilterResult::Filtered(reason) => {
                debug!(address = %candidate.address, %reason, "Candidate filtered");
                Err(reason)
            }
        }
    }
}

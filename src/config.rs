//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// Re-export component configs that live next to their components
pub use crate::filter::scoring::{Curve, ScoringConfig, ScoringWeights};
pub use crate::strategy::exit_manager::{ExitConfig, LadderLevel};
pub use crate::strategy::sizing::{PositionSizingConfig, ScoreTier};
pub use crate::strategy::types::{Mode, ModeTable, ModeThresholds};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub exits: ExitConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Reconnect policy for transient feed errors
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Consecutive failed reads before the feed error is final
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

/// Admission gates. All ranges are inclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_liquidity_usd")]
    pub max_liquidity_usd: f64,
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_min_holders")]
    pub min_holders: u32,
    #[serde(default = "default_max_holders")]
    pub max_holders: u32,
    /// Maximum share of supply held by the top 10 holders, in percent
    #[serde(default = "default_max_top10_pct")]
    pub max_top10_pct: f64,
    #[serde(default = "default_true")]
    pub require_lp_locked: bool,
    #[serde(default = "default_true")]
    pub reject_honeypot: bool,
    /// Volume floor in USD, 0 disables the gate
    #[serde(default)]
    pub min_volume_usd: f64,
    /// Candidates younger than this skip the volume floor
    #[serde(default = "default_volume_grace_secs")]
    pub volume_grace_secs: u64,
    #[serde(default = "default_blocked_addresses")]
    pub blocked_addresses: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_liquidity_usd: default_min_liquidity_usd(),
            max_liquidity_usd: default_max_liquidity_usd(),
            min_age_secs: default_min_age_secs(),
            max_age_secs: default_max_age_secs(),
            min_holders: default_min_holders(),
            max_holders: default_max_holders(),
            max_top10_pct: default_max_top10_pct(),
            require_lp_locked: true,
            reject_honeypot: true,
            min_volume_usd: 0.0,
            volume_grace_secs: default_volume_grace_secs(),
            blocked_addresses: default_blocked_addresses(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// How long first-seen timestamps are remembered per address
    #[serde(default = "default_first_seen_ttl_secs")]
    pub first_seen_ttl_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            stats_interval_secs: default_stats_interval_secs(),
            first_seen_ttl_secs: default_first_seen_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Execute automatically; when false qualifying candidates become alerts
    #[serde(default)]
    pub auto_buy_enabled: bool,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    #[serde(default = "default_daily_cap_sol")]
    pub daily_cap_sol: f64,
    #[serde(default)]
    pub modes: ModeTable,
    #[serde(default)]
    pub sizing: PositionSizingConfig,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            auto_buy_enabled: false,
            max_concurrent_positions: default_max_concurrent_positions(),
            daily_cap_sol: default_daily_cap_sol(),
            modes: ModeTable::default(),
            sizing: PositionSizingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Total attempts for transient failures (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Per-attempt bound; an attempt that exceeds it counts as a timeout
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Consecutive transient failures that open the circuit breaker
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// How long the breaker stays open before a trial submission
    #[serde(default = "default_breaker_recovery_ms")]
    pub breaker_recovery_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_ms: default_breaker_recovery_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_predictor_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_predictor_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
    /// JSON snapshot of open positions; disabled when unset
    #[serde(default)]
    pub positions_path: Option<String>,
}

// Default value functions
fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    10_000
}

fn default_min_liquidity_usd() -> f64 {
    5_000.0
}

fn default_max_liquidity_usd() -> f64 {
    500_000.0
}

fn default_min_age_secs() -> u64 {
    30
}

fn default_max_age_secs() -> u64 {
    600
}

fn default_min_holders() -> u32 {
    50
}

fn default_max_holders() -> u32 {
    5_000
}

fn default_max_top10_pct() -> f64 {
    30.0
}

fn default_volume_grace_secs() -> u64 {
    60
}

fn default_blocked_addresses() -> Vec<String> {
    vec![
        "So11111111111111111111111111111111111111112".into(),
        "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(),
        "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".into(),
    ]
}

fn default_queue_capacity() -> usize {
    1_000
}

fn default_workers() -> usize {
    5
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_first_seen_ttl_secs() -> u64 {
    3_600
}

fn default_max_concurrent_positions() -> usize {
    5
}

fn default_daily_cap_sol() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    4_000
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_recovery_ms() -> u64 {
    60_000
}

fn default_predictor_timeout_ms() -> u64 {
    2_000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Invalid thresholds are fatal here, never at runtime
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.feed.max_reconnect_attempts == 0 {
            anyhow::bail!("feed: max_reconnect_attempts must be at least 1");
        }

        let f = &self.filters;
        if f.min_liquidity_usd < 0.0 || f.min_liquidity_usd > f.max_liquidity_usd {
            anyhow::bail!(
                "filters: liquidity range [{}, {}] is invalid",
                f.min_liquidity_usd,
                f.max_liquidity_usd
            );
        }
        if f.min_age_secs > f.max_age_secs {
            anyhow::bail!(
                "filters: age range [{}, {}] is invalid",
                f.min_age_secs,
                f.max_age_secs
            );
        }
        if f.min_holders > f.max_holders {
            anyhow::bail!(
                "filters: holder range [{}, {}] is invalid",
                f.min_holders,
                f.max_holders
            );
        }
        if !(0.0..=100.0).contains(&f.max_top10_pct) {
            anyhow::bail!("filters: max_top10_pct must be between 0 and 100");
        }
        if f.min_volume_usd < 0.0 {
            anyhow::bail!("filters: min_volume_usd cannot be negative");
        }

        self.scoring
            .validate()
            .map_err(|e| anyhow::anyhow!("scoring: {}", e))?;

        if self.dispatch.queue_capacity == 0 {
            anyhow::bail!("dispatch: queue_capacity must be at least 1");
        }
        if self.dispatch.workers == 0 {
            anyhow::bail!("dispatch: workers must be at least 1");
        }

        let d = &self.decision;
        if d.max_concurrent_positions == 0 {
            anyhow::bail!("decision: max_concurrent_positions must be at least 1");
        }
        if d.daily_cap_sol <= 0.0 {
            anyhow::bail!("decision: daily_cap_sol must be positive");
        }
        d.modes
            .validate()
            .map_err(|e| anyhow::anyhow!("decision.modes: {}", e))?;
        d.sizing
            .validate()
            .map_err(|e| anyhow::anyhow!("decision.sizing: {}", e))?;

        self.exits
            .validate()
            .map_err(|e| anyhow::anyhow!("exits: {}", e))?;

        if self.execution.max_attempts == 0 {
            anyhow::bail!("execution: max_attempts must be at least 1");
        }
        if self.execution.submit_timeout_ms == 0 {
            anyhow::bail!("execution: submit_timeout_ms must be positive");
        }
        if self.execution.breaker_failure_threshold == 0 {
            anyhow::bail!("execution: breaker_failure_threshold must be at least 1");
        }
        if self.predictor.timeout_ms == 0 {
            anyhow::bail!("predictor: timeout_ms must be positive");
        }

        if d.auto_buy_enabled {
            tracing::warn!(
                "Auto-buy is ENABLED in {} mode: qualifying candidates execute without confirmation",
                d.mode
            );
        }

        Ok(())
    }

    /// Get configuration for display (persistence path masked to file name)
    pub fn masked_display(&self) -> String {
        let ladder: Vec<String> = self
            .exits
            .ladder
            .iter()
            .map(|l| format!("{:.0}%@{:.2}x", l.fraction * 100.0, l.multiplier))
            .collect();
        let thresholds = self.decision.modes.get(self.decision.mode);

        format!(
            r#"Configuration:
  Filters:
    liquidity: ${} - ${}
    age: {}s - {}s
    holders: {} - {}
    max_top10: {}%
    require_lp_locked: {}
    reject_honeypot: {}
    blocked_addresses: {}
  Dispatch:
    queue_capacity: {}
    workers: {}
  Decision:
    mode: {} (min_score={}, min_confidence={}, max_risk={})
    auto_buy: {}
    max_concurrent_positions: {}
    daily_cap: {} SOL
    size: {} SOL base, [{}, {}] SOL
  Exits:
    stop_loss: {:.1}%
    trailing: {:.1}% after +{:.1}%
    ladder: {}
    max_hold: {}s
    tick: {}ms
  Feed:
    max_reconnect_attempts: {}
  Execution:
    max_attempts: {}
    submit_timeout: {}ms
    breaker: opens after {} failures, {}ms recovery
  Predictor:
    enabled: {}
    timeout: {}ms
  Persistence:
    positions: {}
"#,
            self.filters.min_liquidity_usd,
            self.filters.max_liquidity_usd,
            self.filters.min_age_secs,
            self.filters.max_age_secs,
            self.filters.min_holders,
            self.filters.max_holders,
            self.filters.max_top10_pct,
            self.filters.require_lp_locked,
            self.filters.reject_honeypot,
            self.filters.blocked_addresses.len(),
            self.dispatch.queue_capacity,
            self.dispatch.workers,
            self.decision.mode,
            thresholds.min_score,
            thresholds.min_confidence,
            thresholds.max_risk,
            self.decision.auto_buy_enabled,
            self.decision.max_concurrent_positions,
            self.decision.daily_cap_sol,
            self.decision.sizing.base_size_sol,
            self.decision.sizing.min_size_sol,
            self.decision.sizing.max_size_sol,
            self.exits.stop_loss_pct * 100.0,
            self.exits.trailing_pct * 100.0,
            self.exits.trailing_activation_pct * 100.0,
            ladder.join(", "),
            self.exits.max_hold_secs,
            self.exits.tick_interval_ms,
            self.feed.max_reconnect_attempts,
            self.execution.max_attempts,
            self.execution.submit_timeout_ms,
            self.execution.breaker_failure_threshold,
            self.execution.breaker_recovery_ms,
            self.predictor.enabled,
            self.predictor.timeout_ms,
            mask_path(self.persistence.positions_path.as_deref()),
        )
    }
}

/// Mask a path for display, keeping only the file name
fn mask_path(path: Option<&str>) -> String {
    match path {
        None => "(disabled)".to_string(),
        Some(p) => Path::new(p)
            .file_name()
            .map(|n| format!(".../{}", n.to_string_lossy()))
            .unwrap_or_else(|| p.to_string()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            filters: FilterConfig::default(),
            scoring: ScoringConfig::default(),
            dispatch: DispatchConfig::default(),
            decision: DecisionConfig::default(),
            exits: ExitConfig::default(),
            execution: ExecutionConfig::default(),
            predictor: PredictorConfig::default(),
            shutdown: ShutdownConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

//! Position management
//!
//! The position manager is a single actor that owns every open position. It
//! ticks on a fixed interval, reads one price per position, evaluates exit
//! triggers and submits exits. Exit submissions run as spawned tasks so a
//! slow exit never holds up the other positions; their results come back to
//! the actor, which is the only place positions are mutated.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ExecutionFailure, Result};
use crate::filter::types::Candidate;
use crate::position::price_feed::PriceSource;
use crate::position::types::{DailyStats, ExitOrder, Position, PositionBook};
use crate::strategy::exit_manager::{ExitConfig, ExitManager, ExitSignal};
use crate::strategy::learning::{report_outcome, LearningSink, TradeOutcome};
use crate::strategy::portfolio_risk::{AdmissionLedger, Reservation};
use crate::trading::executor::TradeExecutor;
use crate::trading::in_flight::{InFlightGuard, InFlightKind, InFlightRegistry};
use crate::trading::types::{ExecutionReceipt, TradeIntent};

/// Requests handled by the position manager
#[derive(Debug)]
pub enum PositionCommand {
    /// A buy confirmed; the guard keeps the address claimed until the
    /// position is visible in the book, and the reservation is settled by
    /// the open
    Open {
        features: Candidate,
        intent: TradeIntent,
        receipt: ExecutionReceipt,
        reservation: Reservation,
        guard: InFlightGuard,
    },
}

/// Result of one exit submission
struct ExitCompletion {
    address: String,
    order: ExitOrder,
    result: std::result::Result<ExecutionReceipt, ExecutionFailure>,
    guard: InFlightGuard,
}

/// Read positions from a snapshot file
pub async fn load_snapshot(path: &Path) -> Result<Vec<Position>> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::PositionPersistence(format!("{}: {}", path.display(), e)))?;

    let positions: BTreeMap<String, Position> = serde_json::from_str(&data)
        .map_err(|e| Error::PositionPersistence(format!("{}: {}", path.display(), e)))?;

    Ok(positions.into_values().collect())
}

/// Position manager
pub struct PositionManager {
    exit_manager: ExitManager,
    positions: BTreeMap<String, Position>,
    book: PositionBook,
    daily_stats: DailyStats,
    executor: Arc<dyn TradeExecutor>,
    prices: Arc<dyn PriceSource>,
    in_flight: Arc<InFlightRegistry>,
    ledger: Arc<AdmissionLedger>,
    learning: Option<Arc<dyn LearningSink>>,
    persistence_path: Option<PathBuf>,
    pending: JoinSet<ExitCompletion>,
}

impl PositionManager {
    /// Create a new position manager
    pub fn new(
        config: ExitConfig,
        executor: Arc<dyn TradeExecutor>,
        prices: Arc<dyn PriceSource>,
        in_flight: Arc<InFlightRegistry>,
        ledger: Arc<AdmissionLedger>,
    ) -> Self {
        Self {
            exit_manager: ExitManager::new(config),
            positions: BTreeMap::new(),
            book: PositionBook::new(),
            daily_stats: DailyStats::new(Utc::now()),
            executor,
            prices,
            in_flight,
            ledger,
            learning: None,
            persistence_path: None,
            pending: JoinSet::new(),
        }
    }

    pub fn with_persistence(mut self, path: Option<PathBuf>) -> Self {
        self.persistence_path = path;
        self
    }

    pub fn with_learning_sink(mut self, sink: Option<Arc<dyn LearningSink>>) -> Self {
        self.learning = sink;
        self
    }

    /// Shared read-only view
    pub fn book(&self) -> PositionBook {
        self.book.clone()
    }

    pub fn get(&self, address: &str) -> Option<&Position> {
        self.positions.get(address)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn daily_stats(&self) -> &DailyStats {
        &self.daily_stats
    }

    /// Exits submitted and not yet applied
    pub fn pending_exits(&self) -> usize {
        self.pending.len()
    }

    /// Load positions from disk.
    ///
    /// Restored positions take their slots in the admission ledger. Exits that
    /// were unconfirmed at the last shutdown are resubmitted on the first tick.
    pub async fn load(&mut self) -> Result<usize> {
        let Some(path) = self.persistence_path.clone() else {
            return Ok(0);
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("No position snapshot at {}", path.display());
            return Ok(0);
        }

        let mut restored = 0;
        let mut unconfirmed = 0;
        for position in load_snapshot(&path).await? {
            if position.is_closed() || self.positions.contains_key(&position.address) {
                continue;
            }
            if position.pending_exit.is_some() {
                unconfirmed += 1;
            }
            self.book.publish(&position);
            self.positions.insert(position.address.clone(), position);
            restored += 1;
        }
        self.ledger.restore_slots(restored);

        info!(
            "Loaded {} positions from {} ({} with unconfirmed exits)",
            restored,
            path.display(),
            unconfirmed
        );
        Ok(restored)
    }

    /// Save positions to disk
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let data = serde_json::to_string_pretty(&self.positions)
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        debug!("Saved {} positions to {}", self.positions.len(), path.display());
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            warn!("Failed to save positions: {}", e);
        }
    }

    /// Open a new position from a confirmed buy
    pub async fn open(
        &mut self,
        features: Candidate,
        intent: &TradeIntent,
        receipt: &ExecutionReceipt,
        reservation: Reservation,
    ) -> Result<()> {
        if self.positions.contains_key(&intent.address) {
            // No position to hold the reserved slot or spend
            self.ledger.refund(reservation, Utc::now());
            return Err(Error::DuplicatePosition(intent.address.clone()));
        }
        reservation.confirm();

        let position = Position::open(features, intent, receipt);
        info!(
            address = %position.address,
            entry_sol = position.entry_sol,
            entry_price = position.entry_price,
            signature = %position.entry_signature,
            mode = %position.mode,
            "Opened position"
        );

        self.book.publish(&position);
        self.positions.insert(position.address.clone(), position);
        self.persist().await;
        Ok(())
    }

    pub async fn handle_command(&mut self, command: PositionCommand) {
        match command {
            PositionCommand::Open {
                features,
                intent,
                receipt,
                reservation,
                guard,
            } => {
                if let Err(e) = self.open(features, &intent, &receipt, reservation).await {
                    error!("Failed to open position: {}", e);
                }
                drop(guard);
            }
        }
    }

    /// Evaluate every position once against a fresh price
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let addresses: Vec<String> = self.positions.keys().cloned().collect();
        let activation = self.exit_manager.config().trailing_activation_pct;
        let mut dirty = false;

        for address in addresses {
            let exiting = self.in_flight.is_in_flight(&address);

            // An exit left unconfirmed by a previous run goes out before any
            // trigger is evaluated
            if !exiting {
                let unconfirmed = self
                    .positions
                    .get(&address)
                    .and_then(|p| p.pending_exit.clone());
                if let Some(order) = unconfirmed {
                    self.resubmit(&address, order);
                    continue;
                }
            }

            let price = match self.prices.price(&address).await {
                Some(p) if p.is_finite() && p > 0.0 => p,
                _ => {
                    debug!(%address, "No price this tick");
                    continue;
                }
            };

            let Some(position) = self.positions.get_mut(&address) else {
                continue;
            };
            if position.observe_price(price, activation) {
                info!(
                    %address,
                    price,
                    entry_price = position.entry_price,
                    "Trailing stop armed"
                );
            }

            // Peak tracking continues while an exit is out; triggers wait
            if exiting {
                self.book.publish(position);
                continue;
            }

            let signal = self.exit_manager.evaluate(position, price, now);
            self.book.publish(position);

            if let Some(signal) = signal {
                dirty |= self.submit_exit(&address, signal, now);
            }
        }

        if dirty {
            self.persist().await;
        }
    }

    fn submit_exit(&mut self, address: &str, signal: ExitSignal, now: DateTime<Utc>) -> bool {
        let Some(guard) = self.in_flight.try_acquire(address, InFlightKind::Exit) else {
            return false;
        };
        let Some(position) = self.positions.get_mut(address) else {
            return false;
        };

        let intent = TradeIntent::sell(
            address,
            position.entry_sol * signal.fraction,
            signal.fraction,
            signal.trigger.to_string(),
            position.mode,
        );
        let order = ExitOrder {
            intent,
            trigger: signal.trigger,
            fraction: signal.fraction,
            trigger_price: signal.price,
            submitted_at: now,
        };

        info!(
            %address,
            trigger = %order.trigger,
            fraction = order.fraction,
            price = signal.price,
            entry_price = position.entry_price,
            "Exit triggered"
        );

        position.pending_exit = Some(order.clone());
        self.book.publish(position);
        self.spawn_exit(address, order, guard);
        true
    }

    fn resubmit(&mut self, address: &str, order: ExitOrder) {
        let Some(guard) = self.in_flight.try_acquire(address, InFlightKind::Exit) else {
            return;
        };
        info!(
            %address,
            trigger = %order.trigger,
            fraction = order.fraction,
            "Resubmitting unconfirmed exit"
        );
        self.spawn_exit(address, order, guard);
    }

    fn spawn_exit(&mut self, address: &str, order: ExitOrder, guard: InFlightGuard) {
        let executor = self.executor.clone();
        let address = address.to_string();
        self.pending.spawn(async move {
            let result = executor.submit(&order.intent).await;
            ExitCompletion {
                address,
                order,
                result,
                guard,
            }
        });
    }

    async fn apply_completion(&mut self, completion: ExitCompletion, now: DateTime<Utc>) {
        let ExitCompletion {
            address,
            order,
            result,
            guard,
        } = completion;
        let threshold = self.exit_manager.config().exit_failure_warn_threshold;

        let Some(position) = self.positions.get_mut(&address) else {
            warn!(%address, "Exit completed for unknown position");
            return;
        };
        position.pending_exit = None;

        match result {
            Ok(receipt) => {
                position.failed_exit_attempts = 0;
                let exited = position.apply_exit(&order.trigger, order.fraction, receipt.price);
                info!(
                    %address,
                    trigger = %order.trigger,
                    exited,
                    remaining = position.filled_fraction,
                    price = receipt.price,
                    signature = %receipt.signature,
                    "Exit confirmed"
                );

                if position.is_closed() {
                    if let Some(closed) = self.positions.remove(&address) {
                        self.close(closed, now);
                    }
                } else {
                    self.book.publish(position);
                }
            }
            Err(failure) => {
                position.failed_exit_attempts += 1;
                let attempts = position.failed_exit_attempts;
                if attempts >= threshold {
                    warn!(
                        %address,
                        attempts,
                        trigger = %order.trigger,
                        "Exit keeps failing, position still open: {}",
                        failure
                    );
                } else {
                    info!(
                        %address,
                        attempts,
                        "Exit failed, retrying next tick: {}",
                        failure
                    );
                }
                self.book.publish(position);
            }
        }

        drop(guard);
        self.persist().await;
    }

    fn close(&mut self, position: Position, now: DateTime<Utc>) {
        self.book.remove(&position.address);
        self.ledger.release_slot();

        let pnl_sol = position.realized_pnl_sol();
        self.daily_stats.record_trade(pnl_sol, now);
        info!(
            address = %position.address,
            pnl_sol,
            return_pct = position.realized_return_pct(),
            held_secs = position.hold_secs(now),
            daily_trades = self.daily_stats.total_trades,
            daily_net_sol = self.daily_stats.net_pnl_sol,
            "Position closed"
        );

        report_outcome(
            self.learning.as_ref(),
            TradeOutcome {
                address: position.address.clone(),
                realized_return_pct: position.realized_return_pct(),
                hold_duration_secs: position.hold_secs(now),
                features: position.features,
            },
        );
    }

    async fn handle_joined(
        &mut self,
        joined: std::result::Result<ExitCompletion, JoinError>,
        now: DateTime<Utc>,
    ) {
        match joined {
            Ok(completion) => self.apply_completion(completion, now).await,
            // The order stays pending on the position and is resubmitted
            Err(e) => error!("Exit task failed: {}", e),
        }
    }

    /// Wait for every submitted exit and apply the results
    pub async fn settle(&mut self) {
        while let Some(joined) = self.pending.join_next().await {
            self.handle_joined(joined, Utc::now()).await;
        }
    }

    /// Run until `shutdown` fires, then drain in-flight exits within
    /// `drain_timeout` and save.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PositionCommand>,
        shutdown: CancellationToken,
        drain_timeout: Duration,
    ) -> Result<()> {
        let tick_ms = self.exit_manager.config().tick_interval_ms;
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        info!(
            positions = self.positions.len(),
            tick_ms,
            "Position manager started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    self.handle_joined(joined, Utc::now()).await;
                }

                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => commands_open = false,
                },

                _ = ticker.tick() => self.tick(Utc::now()).await,
            }
        }

        // Buys confirmed before shutdown still become positions
        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.handle_command(command).await;
        }

        if !self.pending.is_empty() {
            info!(pending = self.pending.len(), "Draining in-flight exits");
            if tokio::time::timeout(drain_timeout, self.settle()).await.is_err() {
                warn!(
                    unconfirmed = self.pending.len(),
                    "Exits unconfirmed at shutdown, resubmitting on next start"
                );
                self.pending.abort_all();
            }
        }

        self.save().await?;
        info!(positions = self.positions.len(), "Position manager stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::position::price_feed::PriceBook;
    use crate::strategy::exit_manager::LadderLevel;
    use crate::strategy::portfolio_risk::AdmissionLimits;
    use crate::strategy::types::Mode;
    use crate::test_support::{candidate, CountingSink, ScriptedExecutor};
    use tempfile::TempDir;

    struct Harness {
        manager: PositionManager,
        prices: PriceBook,
        executor: Arc<ScriptedExecutor>,
        ledger: Arc<AdmissionLedger>,
        in_flight: Arc<InFlightRegistry>,
    }

    fn exit_config() -> ExitConfig {
        ExitConfig {
            ladder: vec![
                LadderLevel { multiplier: 1.5, fraction: 0.3 },
                LadderLevel { multiplier: 2.0, fraction: 0.3 },
            ],
            ..ExitConfig::default()
        }
    }

    fn harness(executor: ScriptedExecutor) -> Harness {
        let prices = PriceBook::new();
        let executor = Arc::new(executor);
        let ledger = Arc::new(AdmissionLedger::new(
            AdmissionLimits {
                max_concurrent_positions: 5,
                daily_cap_sol: 10.0,
            },
            Utc::now(),
        ));
        let in_flight = Arc::new(InFlightRegistry::new());
        let manager = PositionManager::new(
            exit_config(),
            executor.clone(),
            Arc::new(prices.clone()),
            in_flight.clone(),
            ledger.clone(),
        );
        Harness {
            manager,
            prices,
            executor,
            ledger,
            in_flight,
        }
    }

    fn buy(address: &str, entry_price: f64) -> (TradeIntent, ExecutionReceipt) {
        let intent = TradeIntent::buy(address, 0.1, "test", Mode::Balanced);
        let receipt = ExecutionReceipt {
            signature: format!("buy-{}", address),
            price: entry_price,
            filled_at: Utc::now(),
        };
        (intent, receipt)
    }

    async fn open(h: &mut Harness, address: &str, entry_price: f64) {
        let reservation = h.ledger.try_reserve(0.1, Utc::now()).unwrap();
        let (intent, receipt) = buy(address, entry_price);
        h.manager
            .open(candidate(address), &intent, &receipt, reservation)
            .await
            .unwrap();
    }

    async fn tick_at(h: &mut Harness, address: &str, price: f64) {
        h.prices.update(address, price, Utc::now());
        h.manager.tick(Utc::now()).await;
        h.manager.settle().await;
    }

    #[tokio::test]
    async fn test_ladder_then_stop_loss_closes_position() {
        let mut h = harness(ScriptedExecutor::new(vec![Ok(1.6), Ok(0.8)]));
        let sink = Arc::new(CountingSink::default());
        let dyn_sink: Arc<dyn LearningSink> = sink.clone();
        h.manager = h.manager.with_learning_sink(Some(dyn_sink));
        open(&mut h, "Mint111", 1.0).await;

        tick_at(&mut h, "Mint111", 1.6).await;
        let p = h.manager.get("Mint111").unwrap();
        assert!((p.filled_fraction - 0.7).abs() < 1e-12);
        assert!(p.exit_levels_hit.contains(&0));
        assert_eq!(p.status, crate::position::types::PositionStatus::PartiallyClosed);

        tick_at(&mut h, "Mint111", 0.8).await;
        assert!(h.manager.get("Mint111").is_none());
        assert!(!h.manager.book().contains("Mint111"));
        assert_eq!(h.ledger.snapshot(Utc::now()).open_position_count, 0);
        assert_eq!(h.manager.daily_stats().total_trades, 1);

        // Last sell covers the remaining 0.7 of the original size
        let sells = h.executor.submitted();
        assert_eq!(sells.len(), 2);
        assert!((sells[1].fraction - 0.7).abs() < 1e-12);

        sink.wait_for(1).await;
        assert_eq!(sink.recorded()[0].address, "Mint111");
    }

    #[tokio::test]
    async fn test_duplicate_open_refunds_reservation() {
        let mut h = harness(ScriptedExecutor::new(vec![]));
        open(&mut h, "Mint111", 1.0).await;

        let reservation = h.ledger.try_reserve(0.1, Utc::now()).unwrap();
        let state = h.ledger.snapshot(Utc::now());
        assert_eq!(state.open_position_count, 2);
        assert!((state.spent_sol_today - 0.2).abs() < 1e-12);

        let (intent, receipt) = buy("Mint111", 1.2);
        let err = h
            .manager
            .open(candidate("Mint111"), &intent, &receipt, reservation)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePosition(_)));

        let state = h.ledger.snapshot(Utc::now());
        assert_eq!(state.open_position_count, 1);
        assert!((state.spent_sol_today - 0.1).abs() < 1e-12);
        assert_eq!(h.manager.get("Mint111").unwrap().entry_price, 1.0);
    }

    #[tokio::test]
    async fn test_failed_exit_leaves_position_and_retries() {
        let mut h = harness(ScriptedExecutor::new(vec![
            Err(FailureKind::SlippageExceeded),
            Ok(1.6),
        ]));
        open(&mut h, "Mint111", 1.0).await;

        tick_at(&mut h, "Mint111", 1.6).await;
        let p = h.manager.get("Mint111").unwrap();
        assert_eq!(p.filled_fraction, 1.0);
        assert!(p.exit_levels_hit.is_empty());
        assert_eq!(p.failed_exit_attempts, 1);
        assert!(p.pending_exit.is_none());

        tick_at(&mut h, "Mint111", 1.6).await;
        let p = h.manager.get("Mint111").unwrap();
        assert!((p.filled_fraction - 0.7).abs() < 1e-12);
        assert_eq!(p.failed_exit_attempts, 0);
        assert_eq!(h.executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_level_not_refired_while_exit_in_flight() {
        let mut h = harness(
            ScriptedExecutor::new(vec![Ok(1.6)])
                .with_address_delay("Mint111", Duration::from_millis(100)),
        );
        open(&mut h, "Mint111", 1.0).await;

        h.prices.update("Mint111", 1.6, Utc::now());
        h.manager.tick(Utc::now()).await;
        h.manager.tick(Utc::now()).await;
        assert!(h.in_flight.is_in_flight("Mint111"));
        assert_eq!(h.manager.pending_exits(), 1);

        h.manager.settle().await;
        assert!(!h.in_flight.is_in_flight("Mint111"));
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_peak_tracked_while_exit_in_flight() {
        let mut h = harness(
            ScriptedExecutor::new(vec![Ok(1.6)])
                .with_address_delay("Mint111", Duration::from_millis(100)),
        );
        open(&mut h, "Mint111", 1.0).await;

        h.prices.update("Mint111", 1.6, Utc::now());
        h.manager.tick(Utc::now()).await;
        assert!(h.in_flight.is_in_flight("Mint111"));

        h.prices.update("Mint111", 3.0, Utc::now());
        h.manager.tick(Utc::now()).await;
        let p = h.manager.get("Mint111").unwrap();
        assert_eq!(p.peak_price, 3.0);
        assert!(p.trailing_armed);
        assert_eq!(h.manager.book().get("Mint111").unwrap().peak_price, 3.0);
        // Only the first ladder sell went out
        assert_eq!(h.manager.pending_exits(), 1);

        h.manager.settle().await;
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.manager.get("Mint111").unwrap().peak_price, 3.0);
    }

    #[tokio::test]
    async fn test_slow_exit_does_not_block_other_positions() {
        let mut h = harness(
            ScriptedExecutor::new(vec![])
                .with_address_delay("Slow111", Duration::from_secs(2))
                .with_address_script("Slow111", vec![Ok(0.5)])
                .with_address_script("Fast111", vec![Ok(0.5)]),
        );
        open(&mut h, "Slow111", 1.0).await;
        open(&mut h, "Fast111", 1.0).await;

        h.prices.update("Slow111", 0.5, Utc::now());
        h.prices.update("Fast111", 0.5, Utc::now());
        h.manager.tick(Utc::now()).await;
        assert_eq!(h.manager.pending_exits(), 2);

        // The fast exit completes while the slow one is still outstanding
        let joined = h.manager.pending.join_next().await.unwrap();
        h.manager.handle_joined(joined, Utc::now()).await;
        assert!(h.manager.get("Fast111").is_none());
        assert!(h.manager.get("Slow111").is_some());
        assert!(h.in_flight.is_in_flight("Slow111"));
    }

    #[tokio::test]
    async fn test_unconfirmed_exit_resubmitted_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");

        let mut h = harness(ScriptedExecutor::new(vec![]));
        h.manager = h.manager.with_persistence(Some(path.clone()));
        open(&mut h, "Mint111", 1.0).await;
        {
            let p = h.manager.positions.get_mut("Mint111").unwrap();
            p.pending_exit = Some(ExitOrder {
                intent: TradeIntent::sell("Mint111", 0.1, 1.0, "stop-loss", Mode::Balanced),
                trigger: crate::strategy::exit_manager::ExitTrigger::StopLoss,
                fraction: 1.0,
                trigger_price: 0.8,
                submitted_at: Utc::now(),
            });
        }
        h.manager.save().await.unwrap();

        let mut restarted = harness(ScriptedExecutor::new(vec![Ok(0.8)]));
        restarted.manager = restarted.manager.with_persistence(Some(path.clone()));
        assert_eq!(restarted.manager.load().await.unwrap(), 1);
        assert_eq!(restarted.ledger.snapshot(Utc::now()).open_position_count, 1);
        assert!(restarted.manager.book().contains("Mint111"));

        // Price would trigger nothing; the stored order still goes out first
        tick_at(&mut restarted, "Mint111", 1.0).await;
        let sells = restarted.executor.submitted();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].reason, "stop-loss");
        assert!(restarted.manager.get("Mint111").is_none());

        let on_disk = load_snapshot(&path).await.unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn test_run_opens_positions_and_saves_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let h = harness(ScriptedExecutor::new(vec![]));
        let in_flight = h.in_flight.clone();
        let ledger = h.ledger.clone();
        let manager = h.manager.with_persistence(Some(path.clone()));
        let book = manager.book();

        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(manager.run(rx, shutdown.clone(), Duration::from_secs(1)));

        let guard = in_flight.try_acquire("Mint111", InFlightKind::Entry).unwrap();
        tx.send(PositionCommand::Open {
            features: candidate("Mint111"),
            intent: TradeIntent::buy("Mint111", 0.1, "test", Mode::Balanced),
            receipt: ExecutionReceipt {
                signature: "buy".into(),
                price: 1.0,
                filled_at: Utc::now(),
            },
            reservation: ledger.try_reserve(0.1, Utc::now()).unwrap(),
            guard,
        })
        .await
        .unwrap();

        for _ in 0..100 {
            if book.contains("Mint111") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(book.contains("Mint111"));
        assert!(!in_flight.is_in_flight("Mint111"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        let saved = load_snapshot(&path).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].address, "Mint111");
    }

    #[tokio::test]
    async fn test_exit_outlasting_drain_is_saved_as_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let mut h = harness(
            ScriptedExecutor::new(vec![])
                .with_address_delay("Mint111", Duration::from_secs(30))
                .with_address_script("Mint111", vec![Ok(0.8)]),
        );
        h.manager = h.manager.with_persistence(Some(path.clone()));
        open(&mut h, "Mint111", 1.0).await;
        h.prices.update("Mint111", 0.8, Utc::now());

        let in_flight = h.in_flight.clone();
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.manager.run(rx, shutdown.clone(), Duration::from_millis(50)));

        for _ in 0..100 {
            if in_flight.is_in_flight("Mint111") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(in_flight.is_in_flight("Mint111"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let saved = load_snapshot(&path).await.unwrap();
        assert_eq!(saved.len(), 1);
        let order = saved[0].pending_exit.as_ref().unwrap();
        assert_eq!(order.trigger, crate::strategy::exit_manager::ExitTrigger::StopLoss);
        assert_eq!(order.fraction, 1.0);
        assert_eq!(saved[0].filled_fraction, 1.0);
    }
}

//! Candidate pipeline
//!
//! Feed → admission filter → scorer → dispatch queue → worker pool → decision
//! engine → execution → position manager. The position manager ticks on its
//! own task and sends exits back through the same executor.
//!
//! Shutdown order: stop reading the feed, close the queue, let workers finish
//! their current evaluation (bounded), then stop the position manager, which
//! drains its in-flight exits and saves.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FeedConfig};
use crate::error::{Error, ExecutionFailure, Result};
use crate::filter::admission::AdmissionFilter;
use crate::filter::scoring::Scorer;
use crate::filter::types::{Candidate, CandidateUpdate, ScoredCandidate};
use crate::position::manager::{PositionCommand, PositionManager};
use crate::position::price_feed::PriceSource;
use crate::position::types::PositionBook;
use crate::strategy::engine::DecisionEngine;
use crate::strategy::learning::LearningSink;
use crate::strategy::portfolio_risk::{AdmissionLedger, AdmissionLimits};
use crate::strategy::predictor::{GuardedPredictor, HeuristicPredictor, Predictor};
use crate::strategy::types::{Decision, Mode, ModeSelector, SkipReason};
use crate::stream::dispatch::{DispatchQueue, PushOutcome};
use crate::stream::feed::{CandidateFeed, FeedRetry};
use crate::trading::executor::{CircuitBreaker, RetryingExecutor, TradeExecutor};
use crate::trading::in_flight::{InFlightKind, InFlightRegistry};
use crate::trading::types::{ExecutionReceipt, TradeIntent};

const ALERT_CAPACITY: usize = 64;
const POSITION_COMMAND_CAPACITY: usize = 64;

/// A qualifying candidate waiting for manual confirmation
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub candidate: Candidate,
    pub score: f64,
    /// Suggested buy; carries the size and the mode it was decided in
    pub intent: TradeIntent,
}

/// Result of an entry attempt
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// Buy confirmed and handed to the position manager
    Opened(ExecutionReceipt),
    /// Refused before submission
    Blocked(SkipReason),
    /// Terminal execution failure; no position, spend refunded
    Failed(ExecutionFailure),
}

/// External collaborators the pipeline runs against
pub struct Collaborators {
    pub executor: Arc<dyn TradeExecutor>,
    pub prices: Arc<dyn PriceSource>,
    /// External model; the built-in heuristic is used when prediction is
    /// enabled and none is given
    pub predictor: Option<Arc<dyn Predictor>>,
    pub learning: Option<Arc<dyn LearningSink>>,
}

#[derive(Debug, Default)]
struct PipelineStats {
    received: AtomicU64,
    filtered: AtomicU64,
    scored: AtomicU64,
    dropped: AtomicU64,
    executed: AtomicU64,
    alerted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub filtered: u64,
    pub scored: u64,
    /// Rejected or evicted by the full queue
    pub dropped: u64,
    pub executed: u64,
    pub alerted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl PipelineStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            scored: self.scored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            alerted: self.alerted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Shared pipeline state used by the feed loop and every worker
pub struct Pipeline {
    filter: AdmissionFilter,
    scorer: Scorer,
    queue: Arc<DispatchQueue>,
    engine: DecisionEngine,
    predictor: Option<GuardedPredictor>,
    executor: Arc<dyn TradeExecutor>,
    in_flight: Arc<InFlightRegistry>,
    book: PositionBook,
    positions: mpsc::Sender<PositionCommand>,
    alerts_tx: async_channel::Sender<Alert>,
    alerts_rx: async_channel::Receiver<Alert>,
    mode: Arc<ModeSelector>,
    first_seen: DashMap<String, DateTime<Utc>>,
    first_seen_ttl: chrono::Duration,
    workers: usize,
    feed_retry: FeedConfig,
    stats_interval: Duration,
    drain_timeout: Duration,
    stats: PipelineStats,
}

impl Pipeline {
    /// Turn a feed update into a queued candidate.
    ///
    /// Returns `None` when the candidate failed admission; such candidates are
    /// never scored.
    pub fn ingest(&self, update: CandidateUpdate, now: DateTime<Utc>) -> Option<PushOutcome> {
        bump(&self.stats.received);

        let first_seen_at = *self
            .first_seen
            .entry(update.address.clone())
            .or_insert(now);
        let candidate = Candidate::from_update(update, first_seen_at, now);

        let admitted = match self.filter.admit(candidate) {
            Ok(admitted) => admitted,
            Err(_) => {
                bump(&self.stats.filtered);
                return None;
            }
        };

        let score = self.scorer.score(&admitted);
        bump(&self.stats.scored);
        debug!(address = %score.address, score = score.score, "Scored");

        let outcome = self.queue.push(ScoredCandidate {
            candidate: admitted.into_candidate(),
            score,
        });
        if matches!(outcome, PushOutcome::Rejected | PushOutcome::Evicted(_)) {
            bump(&self.stats.dropped);
        }
        Some(outcome)
    }

    /// Decide on a scored candidate, asking the predictor only when the cheap
    /// checks pass
    pub async fn evaluate(&self, scored: &ScoredCandidate) -> Decision {
        let holding = self.book.contains(scored.address());
        if let Some(reason) = self.engine.precheck(holding, Utc::now()) {
            return Decision::Skip(reason);
        }

        let prediction = match &self.predictor {
            Some(predictor) => predictor.predict(&scored.candidate).await.prediction(),
            None => None,
        };

        self.engine
            .evaluate(&scored.score, prediction.as_ref(), holding, Utc::now())
    }

    async fn process(&self, scored: &ScoredCandidate) {
        match self.evaluate(scored).await {
            Decision::Skip(reason) => {
                bump(&self.stats.skipped);
                debug!(address = %scored.address(), %reason, "Skipped");
            }
            Decision::Alert(intent) => {
                bump(&self.stats.alerted);
                info!(
                    address = %intent.address,
                    score = scored.score.score,
                    size_sol = intent.size_sol,
                    mode = %intent.mode,
                    "Alert: candidate qualifies, awaiting confirmation"
                );
                let alert = Alert {
                    candidate: scored.candidate.clone(),
                    score: scored.score.score,
                    intent,
                };
                if let Err(e) = self.alerts_tx.try_send(alert) {
                    warn!("Alert dropped: {}", e);
                }
            }
            Decision::Execute(intent) => {
                self.execute_entry(scored.candidate.clone(), intent).await;
            }
        }
    }

    /// Commit, submit and hand a buy to the position manager.
    ///
    /// The address is claimed for the whole attempt; a terminal failure
    /// refunds the reservation and creates no position.
    pub async fn execute_entry(&self, candidate: Candidate, intent: TradeIntent) -> EntryOutcome {
        let Some(guard) = self
            .in_flight
            .try_acquire(&intent.address, InFlightKind::Entry)
        else {
            bump(&self.stats.skipped);
            return EntryOutcome::Blocked(SkipReason::ExecutionInFlight);
        };
        if self.book.contains(&intent.address) {
            bump(&self.stats.skipped);
            return EntryOutcome::Blocked(SkipReason::AlreadyHolding);
        }

        let reservation = match self.engine.commit(&intent, Utc::now()) {
            Ok(reservation) => reservation,
            Err(reason) => {
                bump(&self.stats.skipped);
                info!(address = %intent.address, %reason, "Buy blocked at commit");
                return EntryOutcome::Blocked(reason);
            }
        };

        info!(
            address = %intent.address,
            size_sol = intent.size_sol,
            reason = %intent.reason,
            "Buying"
        );

        match self.executor.submit(&intent).await {
            Ok(receipt) => {
                bump(&self.stats.executed);
                info!(
                    address = %intent.address,
                    signature = %receipt.signature,
                    price = receipt.price,
                    "Buy confirmed"
                );

                let address = intent.address.clone();
                let command = PositionCommand::Open {
                    features: candidate,
                    intent,
                    receipt: receipt.clone(),
                    reservation,
                    guard,
                };
                if let Err(mpsc::error::SendError(PositionCommand::Open { reservation, .. })) =
                    self.positions.send(command).await
                {
                    self.engine.refund(reservation, Utc::now());
                    error!(%address, "Position manager stopped, confirmed buy not tracked");
                }
                EntryOutcome::Opened(receipt)
            }
            Err(failure) => {
                self.engine.refund(reservation, Utc::now());
                bump(&self.stats.failed);
                warn!(
                    address = %intent.address,
                    kind = %failure.kind,
                    "Buy failed, no position opened: {}",
                    failure.message
                );
                EntryOutcome::Failed(failure)
            }
        }
    }

    /// Execute an alert the operator confirmed.
    ///
    /// Goes through the same caps and in-flight guard as an automatic buy.
    pub async fn confirm(&self, alert: Alert) -> EntryOutcome {
        info!(address = %alert.intent.address, "Alert confirmed");
        let intent = TradeIntent::buy(
            &alert.intent.address,
            alert.intent.size_sol,
            format!("confirmed: {}", alert.intent.reason),
            alert.intent.mode,
        );
        self.execute_entry(alert.candidate, intent).await
    }

    /// Alerts awaiting confirmation
    pub fn alerts(&self) -> async_channel::Receiver<Alert> {
        self.alerts_rx.clone()
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    /// Switch mode; applies from the next evaluation
    pub fn set_mode(&self, mode: Mode) -> Mode {
        let previous = self.mode.set(mode);
        info!("Mode switched: {} -> {}", previous, mode);
        previous
    }

    pub fn auto_buy_enabled(&self) -> bool {
        self.engine.auto_buy_enabled()
    }

    /// Toggle auto-buy; applies from the next evaluation
    pub fn set_auto_buy(&self, enabled: bool) -> bool {
        let previous = self.engine.set_auto_buy(enabled);
        if enabled {
            warn!("Auto-buy ENABLED: qualifying candidates execute without confirmation");
        } else {
            info!("Auto-buy disabled: qualifying candidates become alerts");
        }
        previous
    }

    pub fn book(&self) -> PositionBook {
        self.book.clone()
    }

    pub fn ledger(&self) -> &Arc<AdmissionLedger> {
        self.engine.ledger()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn prune_first_seen(&self, now: DateTime<Utc>) {
        let ttl = self.first_seen_ttl;
        self.first_seen.retain(|_, seen| now - *seen < ttl);
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");
        while let Some(dispatched) = self.queue.pop().await {
            self.process(dispatched.scored()).await;
        }
        debug!(worker = id, "Worker stopped");
    }

    async fn report_stats(self: Arc<Self>, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.stats_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    self.prune_first_seen(Utc::now());
                    let s = self.stats.snapshot();
                    let q = self.queue.stats();
                    info!(
                        received = s.received,
                        filtered = s.filtered,
                        scored = s.scored,
                        dropped = s.dropped,
                        executed = s.executed,
                        alerted = s.alerted,
                        skipped = s.skipped,
                        failed = s.failed,
                        queued = q.queued,
                        evaluating = q.in_flight,
                        positions = self.book.len(),
                        "Pipeline stats"
                    );
                }
            }
        }
    }
}

/// The assembled sniper: pipeline plus the position manager it feeds
pub struct Sniper {
    pipeline: Arc<Pipeline>,
    manager: PositionManager,
    commands: mpsc::Receiver<PositionCommand>,
}

impl Sniper {
    /// Build every component from configuration and restore saved positions
    pub async fn new(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let now = Utc::now();
        let ledger = Arc::new(AdmissionLedger::new(
            AdmissionLimits {
                max_concurrent_positions: config.decision.max_concurrent_positions,
                daily_cap_sol: config.decision.daily_cap_sol,
            },
            now,
        ));
        let mode = Arc::new(ModeSelector::new(config.decision.mode));
        let in_flight = Arc::new(InFlightRegistry::new());
        let retrying = Arc::new(RetryingExecutor::new(
            collaborators.executor,
            config.execution.clone(),
        ));
        let executor: Arc<dyn TradeExecutor> =
            Arc::new(CircuitBreaker::new(retrying, &config.execution));

        let predictor = if config.predictor.enabled {
            let model = collaborators
                .predictor
                .unwrap_or_else(|| Arc::new(HeuristicPredictor) as Arc<dyn Predictor>);
            info!("Prediction enabled ({})", model.name());
            Some(GuardedPredictor::new(
                model,
                Duration::from_millis(config.predictor.timeout_ms),
            ))
        } else {
            None
        };

        let mut manager = PositionManager::new(
            config.exits.clone(),
            executor.clone(),
            collaborators.prices,
            in_flight.clone(),
            ledger.clone(),
        )
        .with_persistence(config.persistence.positions_path.as_ref().map(PathBuf::from))
        .with_learning_sink(collaborators.learning);
        manager.load().await?;

        let (positions, commands) = mpsc::channel(POSITION_COMMAND_CAPACITY);
        let (alerts_tx, alerts_rx) = async_channel::bounded(ALERT_CAPACITY);

        let pipeline = Pipeline {
            filter: AdmissionFilter::new(config.filters.clone()),
            scorer: Scorer::new(config.scoring.clone()),
            queue: Arc::new(DispatchQueue::new(config.dispatch.queue_capacity)),
            engine: DecisionEngine::new(&config.decision, ledger, mode.clone()),
            predictor,
            executor,
            in_flight,
            book: manager.book(),
            positions,
            alerts_tx,
            alerts_rx,
            mode,
            first_seen: DashMap::new(),
            first_seen_ttl: chrono::Duration::seconds(config.dispatch.first_seen_ttl_secs as i64),
            workers: config.dispatch.workers.max(1),
            feed_retry: config.feed.clone(),
            stats_interval: Duration::from_secs(config.dispatch.stats_interval_secs.max(1)),
            drain_timeout: Duration::from_millis(config.shutdown.drain_timeout_ms),
            stats: PipelineStats::default(),
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            manager,
            commands,
        })
    }

    /// Handle for alerts, mode switches and stats while running
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    /// Run until `shutdown` fires. A feed that ends keeps positions managed
    /// until shutdown.
    pub async fn run<F: CandidateFeed>(self, mut feed: F, shutdown: CancellationToken) -> Result<()> {
        let Sniper {
            pipeline,
            manager,
            commands,
        } = self;
        let drain = pipeline.drain_timeout;

        let manager_stop = CancellationToken::new();
        let manager_task = tokio::spawn(manager.run(commands, manager_stop.clone(), drain));

        let reporter_stop = CancellationToken::new();
        let reporter = tokio::spawn(pipeline.clone().report_stats(reporter_stop.clone()));

        let mut workers = JoinSet::new();
        for id in 0..pipeline.workers {
            workers.spawn(pipeline.clone().worker(id));
        }
        info!(workers = pipeline.workers, mode = %pipeline.mode(), "Pipeline started");

        let mut feed_error = None;
        let mut retry = FeedRetry::new(&pipeline.feed_retry);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                next = feed.next() => match next {
                    Ok(Some(update)) => {
                        retry.reset();
                        pipeline.ingest(update, Utc::now());
                    }
                    Ok(None) => {
                        info!("Feed ended, managing open positions until shutdown");
                        shutdown.cancelled().await;
                        break;
                    }
                    Err(e) if e.is_retryable() => match retry.next_delay() {
                        Some(delay) => {
                            warn!(
                                attempt = retry.failures(),
                                delay_ms = delay.as_millis() as u64,
                                "Feed interrupted, retrying: {}",
                                e
                            );
                            tokio::select! {
                                _ = shutdown.cancelled() => {
                                    info!("Shutdown requested");
                                    break;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            error!(attempts = retry.failures(), "Feed lost, giving up: {}", e);
                            feed_error = Some(e);
                            break;
                        }
                    },
                    Err(e) => {
                        error!("Feed failed: {}", e);
                        feed_error = Some(e);
                        break;
                    }
                },
            }
        }

        let discarded = pipeline.queue.close();
        info!(discarded, "Dispatch queue closed, draining workers");
        let drained = tokio::time::timeout(drain, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Workers still busy after {}ms, aborting", drain.as_millis());
            workers.abort_all();
        }

        reporter_stop.cancel();
        let _ = reporter.await;

        manager_stop.cancel();
        manager_task
            .await
            .map_err(|e| Error::Internal(format!("position manager task failed: {}", e)))??;

        let s = pipeline.stats();
        info!(
            received = s.received,
            executed = s.executed,
            alerted = s.alerted,
            failed = s.failed,
            "Pipeline stopped"
        );

        match feed_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Shared test fixtures and doubles

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, ExecutionFailure, FailureKind, Result};
use crate::filter::types::Candidate;
use crate::position::types::Position;
use crate::strategy::learning::{LearningSink, TradeOutcome};
use crate::strategy::predictor::{Prediction, Predictor};
use crate::strategy::types::Mode;
use crate::trading::executor::TradeExecutor;
use crate::trading::types::{ExecutionReceipt, TradeIntent};

/// Candidate that passes the default gates and scores above 70
pub fn candidate(address: &str) -> Candidate {
    let now = Utc::now();
    Candidate {
        address: address.to_string(),
        liquidity_usd: 15_000.0,
        age_seconds: 180,
        holder_count: 150,
        top10_pct: 20.0,
        volume_usd: 10_000.0,
        lp_locked: true,
        honeypot_flag: false,
        first_seen_at: now,
        observed_at: now,
    }
}

/// Open 0.1 SOL position at `entry_price`
pub fn position(address: &str, entry_price: f64) -> Position {
    let intent = TradeIntent::buy(address, 0.1, "test", Mode::Balanced);
    let receipt = ExecutionReceipt {
        signature: format!("buy-{}", address),
        price: entry_price,
        filled_at: Utc::now(),
    };
    Position::open(candidate(address), &intent, &receipt)
}

/// Executor replaying a script of outcomes: `Ok(fill_price)` or
/// `Err(kind)`. Fills at 1.0 once the script runs out.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<std::result::Result<f64, FailureKind>>>,
    per_address: Mutex<HashMap<String, VecDeque<std::result::Result<f64, FailureKind>>>>,
    delays: HashMap<String, Duration>,
    delay: Duration,
    submitted: Mutex<Vec<TradeIntent>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<std::result::Result<f64, FailureKind>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_address_delay(mut self, address: &str, delay: Duration) -> Self {
        self.delays.insert(address.to_string(), delay);
        self
    }

    /// Outcomes for one address, taking precedence over the shared script
    pub fn with_address_script(
        self,
        address: &str,
        script: Vec<std::result::Result<f64, FailureKind>>,
    ) -> Self {
        self.per_address
            .lock()
            .unwrap()
            .insert(address.to_string(), script.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<TradeIntent> {
        self.submitted.lock().unwrap().clone()
    }

    fn next_outcome(&self, address: &str) -> std::result::Result<f64, FailureKind> {
        if let Some(queue) = self.per_address.lock().unwrap().get_mut(address) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(1.0))
    }
}

#[async_trait]
impl TradeExecutor for ScriptedExecutor {
    async fn submit(
        &self,
        intent: &TradeIntent,
    ) -> std::result::Result<ExecutionReceipt, ExecutionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(intent.clone());

        let delay = self.delays.get(&intent.address).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome(&intent.address) {
            Ok(price) => Ok(ExecutionReceipt {
                signature: format!("sig-{}", intent.id.simple()),
                price,
                filled_at: Utc::now(),
            }),
            Err(kind) => Err(ExecutionFailure::new(kind, "scripted failure")),
        }
    }
}

/// Learning sink counting deliveries
#[derive(Default)]
pub struct CountingSink {
    recorded: Mutex<Vec<TradeOutcome>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl CountingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<TradeOutcome> {
        self.recorded.lock().unwrap().clone()
    }

    /// Wait until `n` deliveries were attempted
    pub async fn wait_for(&self, n: usize) {
        for _ in 0..200 {
            if self.count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} deliveries, saw {}", n, self.count());
    }
}

#[async_trait]
impl LearningSink for CountingSink {
    async fn record(&self, outcome: TradeOutcome) -> Result<()> {
        if !self.fail {
            self.recorded.lock().unwrap().push(outcome);
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Internal("sink offline".into()));
        }
        Ok(())
    }
}

/// Predictor that always errors
pub struct FailingPredictor;

#[async_trait]
impl Predictor for FailingPredictor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn predict(&self, _candidate: &Candidate) -> Result<Prediction> {
        Err(Error::PredictionUnavailable("model offline".into()))
    }
}

/// Predictor that answers after a delay
pub struct SlowPredictor {
    delay: Duration,
}

impl SlowPredictor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Predictor for SlowPredictor {
    fn name(&self) -> &str {
        "slow"
    }

    async fn predict(&self, _candidate: &Candidate) -> Result<Prediction> {
        tokio::time::sleep(self.delay).await;
        Ok(Prediction {
            expected_return_pct: 10.0,
            confidence: 0.9,
            risk_score: 0.1,
        })
    }
}

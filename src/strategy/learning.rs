//! Trade outcome reporting
//!
//! Closed trades are handed to an optional learning sink. Delivery is
//! fire-and-forget: failures are logged and never reach the trading path.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::types::Candidate;

/// Outcome of one fully closed position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeOutcome {
    pub address: String,
    /// Candidate snapshot the entry was decided on
    pub features: Candidate,
    pub realized_return_pct: f64,
    pub hold_duration_secs: i64,
}

/// Consumer of trade outcomes
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn record(&self, outcome: TradeOutcome) -> Result<()>;
}

/// Deliver an outcome on a background task
pub fn report_outcome(sink: Option<&Arc<dyn LearningSink>>, outcome: TradeOutcome) {
    let Some(sink) = sink else {
        return;
    };
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        let address = outcome.address.clone();
        match sink.record(outcome).await {
            Ok(()) => debug!(%address, "Trade outcome recorded"),
            Err(e) => warn!(%address, "Failed to record trade outcome: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candidate, CountingSink};

    fn outcome() -> TradeOutcome {
        TradeOutcome {
            address: "A1".into(),
            features: candidate("A1"),
            realized_return_pct: 12.5,
            hold_duration_secs: 90,
        }
    }

    #[tokio::test]
    async fn test_outcome_delivered() {
        let sink = Arc::new(CountingSink::default());
        let dyn_sink: Arc<dyn LearningSink> = sink.clone();
        report_outcome(Some(&dyn_sink), outcome());
        sink.wait_for(1).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_propagate() {
        let sink = Arc::new(CountingSink::failing());
        let dyn_sink: Arc<dyn LearningSink> = sink.clone();
        report_outcome(Some(&dyn_sink), outcome());
        sink.wait_for(1).await;
        report_outcome(None, outcome());
    }
}

//! Simulated execution
//!
//! Paper-trading executor: fills at the current price from a [`PriceSource`]
//! with random slippage, and can inject transient failures. Used by the CLI
//! in place of a live DEX client.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ExecutionFailure, FailureKind};
use crate::position::price_feed::PriceSource;
use crate::trading::executor::TradeExecutor;
use crate::trading::types::{ExecutionReceipt, Side, TradeIntent};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Maximum adverse slippage in basis points
    pub max_slippage_bps: u32,
    /// Probability (0..=1) that an attempt fails with an RPC error
    pub rpc_failure_rate: f64,
    pub latency: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 100,
            rpc_failure_rate: 0.0,
            latency: Duration::from_millis(50),
        }
    }
}

/// Paper-trading executor
pub struct SimulatedExecutor {
    prices: Arc<dyn PriceSource>,
    config: SimulationConfig,
}

impl SimulatedExecutor {
    pub fn new(prices: Arc<dyn PriceSource>, config: SimulationConfig) -> Self {
        Self { prices, config }
    }

    /// Fill price after slippage; always moves against the trader
    fn fill_price(&self, quote: f64, side: Side) -> f64 {
        let slippage = if self.config.max_slippage_bps == 0 {
            0.0
        } else {
            let bps = rand::thread_rng().gen_range(0..=self.config.max_slippage_bps);
            bps as f64 / 10_000.0
        };
        match side {
            Side::Buy => quote * (1.0 + slippage),
            Side::Sell => quote * (1.0 - slippage),
        }
    }
}

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    async fn submit(&self, intent: &TradeIntent) -> Result<ExecutionReceipt, ExecutionFailure> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.config.rpc_failure_rate > 0.0
            && rand::thread_rng().gen_bool(self.config.rpc_failure_rate.clamp(0.0, 1.0))
        {
            return Err(ExecutionFailure::new(
                FailureKind::RpcError,
                "simulated rpc failure",
            ));
        }

        let quote = self.prices.price(&intent.address).await.ok_or_else(|| {
            ExecutionFailure::new(
                FailureKind::Rejected,
                format!("no quote for {}", intent.address),
            )
        })?;

        let price = self.fill_price(quote, intent.side);
        let signature = format!("sim-{}", Uuid::new_v4().simple());
        debug!(
            address = %intent.address,
            side = %intent.side,
            size_sol = intent.size_sol,
            price,
            "Simulated fill"
        );

        Ok(ExecutionReceipt {
            signature,
            price,
            filled_at: Utc::now(),
        })
    }
}

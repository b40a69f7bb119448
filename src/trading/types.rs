//! Trade intents and receipts exchanged with the execution adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::types::Mode;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Request to buy or sell one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: Uuid,
    pub address: String,
    pub side: Side,
    /// SOL committed for buys; cost basis of the sold portion for sells
    pub size_sol: f64,
    /// Fraction of the original position to sell (1.0 for buys)
    pub fraction: f64,
    pub reason: String,
    pub mode: Mode,
}

impl TradeIntent {
    pub fn buy(
        address: impl Into<String>,
        size_sol: f64,
        reason: impl Into<String>,
        mode: Mode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            side: Side::Buy,
            size_sol,
            fraction: 1.0,
            reason: reason.into(),
            mode,
        }
    }

    pub fn sell(
        address: impl Into<String>,
        size_sol: f64,
        fraction: f64,
        reason: impl Into<String>,
        mode: Mode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            side: Side::Sell,
            size_sol,
            fraction,
            reason: reason.into(),
            mode,
        }
    }
}

/// Confirmed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub signature: String,
    /// Fill price in SOL per token
    pub price: f64,
    pub filled_at: DateTime<Utc>,
}

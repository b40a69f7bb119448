//! Price feed for position monitoring
//!
//! The position manager reads one price per position per tick through
//! [`PriceSource`]. [`PriceBook`] is the in-process implementation: feed
//! adapters push price updates into it and readers get the latest value.
//!
//! WARNING: exits are best-effort, not guaranteed. Between two ticks a fast
//! rug can gap straight through the stop-loss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Price update event
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub address: String,
    /// Price in SOL per token
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Source of current token prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest price for `address`, `None` when unknown
    async fn price(&self, address: &str) -> Option<f64>;
}

/// Latest known price per address
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: Arc<DashMap<String, PriceUpdate>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price; non-finite or non-positive prices are ignored
    pub fn update(&self, address: &str, price: f64, timestamp: DateTime<Utc>) {
        if !price.is_finite() || price <= 0.0 {
            debug!(address, price, "Ignoring invalid price");
            return;
        }
        self.prices.insert(
            address.to_string(),
            PriceUpdate {
                address: address.to_string(),
                price,
                timestamp,
            },
        );
    }

    pub fn get(&self, address: &str) -> Option<PriceUpdate> {
        self.prices.get(address).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl PriceSource for PriceBook {
    async fn price(&self, address: &str) -> Option<f64> {
        self.prices.get(address).map(|p| p.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_price_wins() {
        let book = PriceBook::new();
        let now = Utc::now();
        book.update("Mint111", 1.0, now);
        book.update("Mint111", 1.5, now);
        assert_eq!(book.price("Mint111").await, Some(1.5));
        assert_eq!(book.price("Other").await, None);
    }

    #[tokio::test]
    async fn test_invalid_prices_ignored() {
        let book = PriceBook::new();
        let now = Utc::now();
        book.update("Mint111", 2.0, now);
        book.update("Mint111", f64::NAN, now);
        book.update("Mint111", 0.0, now);
        assert_eq!(book.price("Mint111").await, Some(2.0));
    }
}

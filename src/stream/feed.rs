//! Candidate feed adapters
//!
//! The core only needs a sequence of `CandidateUpdate` records. Delivery is
//! at-least-once with no ordering across addresses; duplicates are handled by
//! the dispatch queue.
//!
//! Line format (one JSON object per line):
//! ```text
//! {"type":"candidate","address":"...","liquidityUsd":15000,...}
//! {"type":"price","address":"...","price":0.00042}
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::filter::types::CandidateUpdate;
use crate::position::price_feed::PriceBook;

/// One record on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRecord {
    Candidate(CandidateUpdate),
    Price { address: String, price: f64 },
}

/// Source of candidate updates
#[async_trait]
pub trait CandidateFeed: Send {
    /// Next update; `Ok(None)` when the feed has ended
    async fn next(&mut self) -> Result<Option<CandidateUpdate>>;
}

/// Newline-delimited JSON feed.
///
/// Price records update the shared [`PriceBook`]; malformed lines are logged
/// and skipped.
pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
    prices: PriceBook,
    line_no: u64,
    malformed: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesFeed<R> {
    pub fn new(reader: R, prices: PriceBook) -> Self {
        Self {
            lines: reader.lines(),
            prices,
            line_no: 0,
            malformed: 0,
        }
    }

    /// Lines that could not be decoded so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    fn decode(&self, line: &str) -> Result<FeedRecord> {
        serde_json::from_str(line)
            .map_err(|e| Error::FeedDecode(format!("line {}: {}", self.line_no, e)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CandidateFeed for JsonLinesFeed<R> {
    async fn next(&mut self) -> Result<Option<CandidateUpdate>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(Error::FeedDisconnected(format!(
                        "read failed after line {}: {}",
                        self.line_no, e
                    )))
                }
            };
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.decode(line) {
                Ok(FeedRecord::Candidate(update)) => return Ok(Some(update)),
                Ok(FeedRecord::Price { address, price }) => {
                    debug!(%address, price, "Price update");
                    self.prices.update(&address, price, Utc::now());
                }
                Err(e) => {
                    self.malformed += 1;
                    warn!("Skipping malformed feed record: {}", e);
                }
            }
        }
    }
}

/// Reconnect policy for a feed that reports transient errors.
///
/// Consecutive failures back off exponentially; once `max_attempts` have
/// failed in a row the error is final. A successful read resets both.
pub struct FeedRetry {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    failures: u32,
}

impl FeedRetry {
    pub fn new(config: &FeedConfig) -> Self {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(config.reconnect_base_delay_ms),
            max_interval: Duration::from_millis(config.reconnect_max_delay_ms),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        Self {
            backoff,
            max_attempts: config.max_reconnect_attempts.max(1),
            failures: 0,
        }
    }

    /// Record a failure. Returns the delay before the next read, or `None`
    /// when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        self.backoff.next_backoff()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        if self.failures > 0 {
            self.failures = 0;
            self.backoff.reset();
        }
    }
}

/// Feed backed by an in-process channel
pub struct ChannelFeed {
    rx: mpsc::Receiver<CandidateUpdate>,
}

impl ChannelFeed {
    pub fn new(rx: mpsc::Receiver<CandidateUpdate>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl CandidateFeed for ChannelFeed {
    async fn next(&mut self) -> Result<Option<CandidateUpdate>> {
        Ok(self.rx.recv().await)
    }
}

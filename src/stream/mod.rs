//! Stream module - candidate ingestion and dispatch
//!
//! - `feed`: candidate sources (NDJSON, in-process channel)
//! - `dispatch`: bounded priority queue feeding the worker pool

pub mod dispatch;
pub mod feed;

pub use dispatch::{DispatchQueue, DispatchStats, Dispatched, PushOutcome};
pub use feed::{CandidateFeed, ChannelFeed, FeedRecord, FeedRetry, JsonLinesFeed};

//! Position management module
//!
//! - `manager`: the actor that owns open positions and runs exits
//! - `price_feed`: latest prices per address
//! - `types`: position model and the shared read-only book

pub mod manager;
pub mod price_feed;
pub mod types;

pub use manager::{load_snapshot, PositionCommand, PositionManager};
pub use price_feed::{PriceBook, PriceSource, PriceUpdate};
pub use types::{DailyStats, ExitOrder, Position, PositionBook, PositionStatus};

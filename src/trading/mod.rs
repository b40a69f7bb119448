//! Trading module - execution adapter seam
//!
//! - `executor`: the `TradeExecutor` trait, retry policy and circuit breaker
//! - `in_flight`: one outstanding execution per address
//! - `simulation`: paper-trading executor for the CLI

pub mod executor;
pub mod in_flight;
pub mod simulation;
pub mod types;

pub use executor::{CircuitBreaker, CircuitState, RetryingExecutor, TradeExecutor};
pub use in_flight::{InFlightGuard, InFlightKind, InFlightRegistry};
pub use simulation::{SimulatedExecutor, SimulationConfig};
pub use types::{ExecutionReceipt, Side, TradeIntent};

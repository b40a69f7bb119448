//! Token Sniper Library
//!
//! Candidate evaluation pipeline (admission, scoring, prioritised dispatch,
//! decisions) and the position lifecycle engine that manages exits.

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod position;
pub mod strategy;
pub mod stream;
pub mod trading;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Alert, Collaborators, EntryOutcome, Pipeline, Sniper};

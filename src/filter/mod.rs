//! Candidate filtering and scoring
//!
//! Admission gates run first; only admitted candidates can be scored.

pub mod admission;
pub mod scoring;
pub mod types;

pub use admission::{Admitted, AdmissionFilter, FilterReason, FilterResult};
pub use scoring::{Curve, ScoreBreakdown, Scorer, ScoringConfig, ScoringWeights};
pub use types::{Candidate, CandidateUpdate, ScoreResult, ScoredCandidate};

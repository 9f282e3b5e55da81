//! # janus-router
//!
//! The query path: intent classification, routing decision, cross-engine
//! orchestration, result merging, and per-query logging.

pub mod intent;
pub mod merge;
pub mod router;

pub use intent::IntentAnalyzer;
pub use merge::merge_hybrid;
pub use router::{QueryRouter, RouterConfig};

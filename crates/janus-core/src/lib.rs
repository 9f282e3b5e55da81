//! # janus-core
//!
//! Core types, traits, and abstractions for the janus hybrid gateway.
//!
//! This crate provides the foundational data structures and trait
//! definitions that other janus crates depend on.

pub mod defaults;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use fingerprint::{normalize_query, query_fingerprint, row_hash};
pub use models::*;
pub use traits::*;

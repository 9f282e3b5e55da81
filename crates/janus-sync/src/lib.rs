//! # janus-sync
//!
//! Bidirectional synchronizer between the relational layer and the concept
//! layer: forward extraction of rows into concepts, backward writeback of
//! concept deltas, conflict resolution with quarantine, crash-safe
//! checkpointing, and adaptive batch sizing.

pub mod mapping;
pub mod synchronizer;
pub mod worker;

pub use mapping::MappingRule;
pub use synchronizer::{SyncReport, Synchronizer};
pub use worker::{SyncEvent, SyncHandle, SyncWorker, SyncWorkerConfig};

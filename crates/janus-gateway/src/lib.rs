//! # janus-gateway
//!
//! The top of the stack: per-tenant quota enforcement and the single,
//! transport-agnostic API surface over the query path, the concept path,
//! evolution, and sync.

pub mod gateway;
pub mod quota;

pub use gateway::{Gateway, GatewayBuilder};
pub use quota::QuotaGate;

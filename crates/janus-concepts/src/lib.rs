//! # janus-concepts
//!
//! The concept store: the semantic side of the gateway.
//!
//! This crate provides:
//! - Concept CRUD with the two-phase vector/metadata write contract
//! - Semantic search with usage tracking
//! - The typed relation graph with BFS traversal
//! - Concept merge with edge redirection
//! - Strength recomputation from usage and relations
//! - PostgreSQL and in-memory metadata repositories

pub mod graph;
pub mod memory;
pub mod pg;
pub mod store;
pub mod strength;

pub use graph::{GraphEdge, GraphNode, Subgraph};
pub use memory::MemoryConceptRepository;
pub use pg::{
    ensure_schema, PgCheckpointStore, PgConceptRepository, PgEvolutionStateStore, PgQueryLogSink,
};
pub use store::{ConceptStore, SearchInput};
pub use strength::concept_strength;

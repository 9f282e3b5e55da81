//! # janus-backends
//!
//! Concrete backends for the janus gateway's external collaborators:
//!
//! - PostgreSQL relational store (connection pool + dynamic row decoding)
//! - Qdrant vector index over its HTTP API
//! - Ollama embedding backend and optional LLM intent tier
//! - Redis query cache with graceful degradation
//! - Deterministic in-memory backends for tests and embedded deployments

pub mod memory;
pub mod ollama;
pub mod pool;
pub mod postgres;
pub mod qdrant;
pub mod redis_cache;

pub use memory::{
    cosine_similarity, sql_row, vector_with_cosine, MemoryCheckpointStore,
    MemoryEvolutionStateStore, MemoryQueryCache, MemoryQueryLogSink, MemoryRelationalStore,
    MemoryVectorIndex, MockEmbeddingBackend,
};
pub use ollama::{OllamaEmbedding, OllamaIntentProvider};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use postgres::{decode_row, validate_identifier, PgRelationalStore};
pub use qdrant::QdrantIndex;
pub use redis_cache::RedisQueryCache;

//! Centralized default constants for the janus gateway.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension. Constant within a deployment;
/// mixing dimensions is an error.
pub const EMBED_DIMENSION: usize = 384;

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model for the LLM intent tier (Ollama).
pub const INTENT_MODEL: &str = "qwen3:4b";

// =============================================================================
// VECTOR ENGINE
// =============================================================================

/// Default Qdrant base URL.
pub const QDRANT_URL: &str = "http://127.0.0.1:6333";

/// Default vector collection name.
pub const VECTOR_COLLECTION: &str = "janus_concepts";

/// Timeout for vector engine requests in seconds.
pub const VECTOR_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// DEADLINES
// =============================================================================

/// Default end-to-end deadline for `execute` in milliseconds.
pub const QUERY_DEADLINE_MS: u64 = 5_000;

/// Default deadline for a semantic search in milliseconds.
pub const SEMANTIC_SEARCH_DEADLINE_MS: u64 = 2_000;

/// Default deadline for a synchronizer batch commit in milliseconds.
pub const SYNC_COMMIT_DEADLINE_MS: u64 = 10_000;

/// Hard deadline for the LLM intent tier in milliseconds.
pub const LLM_INTENT_DEADLINE_MS: u64 = 300;

// =============================================================================
// ROUTING
// =============================================================================

/// Default semantic result count.
pub const SEMANTIC_K: usize = 10;

/// Default minimum cosine similarity for semantic results.
pub const SEMANTIC_THRESHOLD: f32 = 0.5;

/// The LLM decision replaces the deterministic one only when its confidence
/// exceeds the deterministic confidence by at least this margin.
pub const LLM_CONFIDENCE_MARGIN: f32 = 0.15;

/// Semantic share above which a query routes semantic-only.
pub const SEMANTIC_ROUTE_THRESHOLD: f32 = 0.7;

/// Semantic share below which (with SQL hits) a query routes sql-only.
pub const SQL_ROUTE_THRESHOLD: f32 = 0.3;

// =============================================================================
// RETRY
// =============================================================================

/// Backoff schedule for idempotent upstream retries, in milliseconds.
/// One initial attempt plus one retry per entry.
pub const RETRY_BACKOFF_MS: [u64; 3] = [100, 250, 600];

// =============================================================================
// CACHE
// =============================================================================

/// Default query cache TTL in seconds.
pub const CACHE_TTL_SECS: u64 = 300;

/// Query cache key prefix.
pub const CACHE_PREFIX: &str = "janus:query:";

/// Default Redis URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// SYNC
// =============================================================================

/// Default forward sync interval in seconds.
pub const SYNC_INTERVAL_SECS: u64 = 60;

/// Soft cap on synchronizer batch size.
pub const SYNC_BATCH_CAP: usize = 500;

/// Item failure ratio above which the batch size halves.
pub const SYNC_FAILURE_RATIO: f64 = 0.2;

/// Consecutive clean windows required before the batch size doubles.
pub const SYNC_CLEAN_WINDOWS: u32 = 5;

// =============================================================================
// EVOLUTION
// =============================================================================

/// Rolling observation window size (older observations discarded).
pub const EVOLUTION_WINDOW: usize = 1_000;

/// Minimum observations since the last advancement before the next.
pub const EVOLUTION_MIN_QUERIES: u64 = 1_000;

/// Minimum average confidence on successful semantic queries to advance.
pub const SEMANTIC_CONFIDENCE_FLOOR: f32 = 0.70;

/// Absolute semantic p95 ceiling for advancement, in milliseconds.
pub const SEMANTIC_P95_CEILING_MS: u64 = 500;

/// Relative ceiling: semantic p95 must stay within this factor of sql p95.
pub const SEMANTIC_P95_FACTOR: f64 = 2.0;

// =============================================================================
// GRAPH
// =============================================================================

/// Maximum graph traversal depth.
pub const MAX_GRAPH_DEPTH: usize = 3;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum concept name length in bytes.
pub const NAME_MAX_BYTES: usize = 512;

/// Maximum concept description length in bytes.
pub const DESCRIPTION_MAX_BYTES: usize = 64 * 1024;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of connections in the pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

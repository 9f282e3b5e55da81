//! Capability traits at the seams between the core and its collaborators.
//!
//! Components communicate through these narrow operation sets; concrete
//! backends live in `janus-backends` and `janus-concepts`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// RELATIONAL ENGINE
// =============================================================================

/// The external relational engine (SQL execution, transactions).
///
/// The gateway never interprets SQL itself; it forwards statements and
/// consumes opaque rows. `changed_rows`/`fetch_row`/`write_back` are the
/// narrow change-feed surface the synchronizer depends on.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Execute a statement returning rows.
    async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>>;

    /// Execute a statement returning the affected row count.
    async fn execute_command(&self, sql: &str, params: &[JsonValue]) -> Result<u64>;

    /// Rows of `table` changed since `since`, ordered by `(updated_at, pk)`.
    async fn changed_rows(
        &self,
        table: &str,
        pk_column: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SqlRow>>;

    /// Fetch a single row by primary key.
    async fn fetch_row(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
    ) -> Result<Option<SqlRow>>;

    /// Write whitelisted columns back to an existing row. Never creates rows.
    async fn write_back(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
        assignments: &[(String, JsonValue)],
    ) -> Result<u64>;

    /// Engine clock, used for conflict resolution.
    async fn now(&self) -> Result<DateTime<Utc>>;
}

// =============================================================================
// VECTOR ENGINE
// =============================================================================

/// The external vector engine (ANN search over vectors).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self, name: &str, dim: usize, metric: DistanceMetric)
        -> Result<()>;

    /// Insert or replace a point. Idempotent: keyed by `id`.
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: JsonValue) -> Result<()>;

    /// Remove a point. Removing a missing point is not an error.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Fetch a stored vector by id.
    async fn fetch(&self, id: Uuid) -> Result<Option<Vec<f32>>>;

    /// Top-`k` points with similarity `>= threshold`, sorted descending.
    async fn search(&self, vector: &[f32], k: usize, threshold: f32) -> Result<Vec<ScoredPoint>>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for generating text embeddings.
///
/// Deterministic for identical inputs within a deployment.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Optional LLM tier for intent classification.
///
/// Implementations must respect the caller's 300 ms deadline; the LLM is
/// never authoritative (see the analyzer's confidence margin).
#[async_trait]
pub trait IntentProvider: Send + Sync {
    async fn classify(&self, text: &str) -> Result<IntentDecision>;
}

// =============================================================================
// CACHE
// =============================================================================

/// Optional memoization of query results. Never authoritative;
/// last-writer-wins semantics.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Get a cached value. Backend errors degrade to a miss.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value with a TTL. Returns false when the put was dropped.
    async fn put(&self, key: &str, value: &[u8], ttl: std::time::Duration) -> bool;
}

// =============================================================================
// CONCEPT METADATA REPOSITORY
// =============================================================================

/// Persistence for the metadata side of concepts and their relations.
///
/// The Concept Store is the only writer; vectors live in the vector engine,
/// never here.
#[async_trait]
pub trait ConceptRepository: Send + Sync {
    async fn insert(&self, concept: &Concept) -> Result<()>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Concept>>;

    async fn update(&self, concept: &Concept) -> Result<()>;

    /// Delete the concept row and every relation whose endpoints include it.
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    /// Bump `usage_count` by one.
    async fn record_usage(&self, id: Uuid) -> Result<()>;

    /// Look up the concept carrying the given `source_key` metadata.
    async fn find_by_source_key(&self, source_key: &str) -> Result<Option<Concept>>;

    /// Concepts updated after `since`, oldest first.
    async fn updated_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Concept>>;

    /// Insert or update an edge; on a duplicate `(source, target, kind)` the
    /// higher strength wins.
    async fn upsert_relation(&self, relation: &Relation) -> Result<()>;

    async fn remove_relation(&self, source: Uuid, target: Uuid, kind: RelationType) -> Result<()>;

    /// All relations incident to `id`, in either direction.
    async fn relations_of(&self, id: Uuid) -> Result<Vec<Relation>>;
}

// =============================================================================
// OBSERVABILITY SINKS
// =============================================================================

/// Destination for per-query log records.
#[async_trait]
pub trait QueryLogSink: Send + Sync {
    async fn append(&self, entry: &QueryLogEntry) -> Result<()>;
}

/// Consumer of routing outcomes (the evolution tracker).
#[async_trait]
pub trait RouteObserver: Send + Sync {
    async fn observe(&self, observation: RouteObservation);
}

/// Admission control on the query path (the quota gate).
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Check and atomically consume one unit of `resource` for `tenant`.
    async fn admit(&self, tenant: &str, resource: QuotaResource) -> Result<()>;
}

// =============================================================================
// DURABLE STATE
// =============================================================================

/// Persistence for synchronizer checkpoints. Saves must be monotonic.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, direction: SyncDirection, scope: &str) -> Result<Option<SyncCheckpoint>>;

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()>;
}

/// Persistence for the evolution singleton.
#[async_trait]
pub trait EvolutionStateStore: Send + Sync {
    async fn load(&self) -> Result<Option<EvolutionState>>;

    async fn save(&self, state: &EvolutionState) -> Result<()>;
}

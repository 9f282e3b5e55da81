//! Deterministic in-memory backends.
//!
//! These power unit and scenario tests and double as the embedded
//! (single-process) deployment mode. Failure injection is deterministic
//! (fail the next N calls) so tests stay reproducible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use janus_core::{
    CheckpointStore, DistanceMetric, EmbeddingBackend, Error, EvolutionState,
    EvolutionStateStore, QueryCache, QueryLogEntry, QueryLogSink, RelationalStore, Result,
    ScoredPoint, SqlRow, SyncCheckpoint, SyncDirection, VectorIndex,
};

/// Cosine similarity between two vectors of equal dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a > 0.0 && mag_b > 0.0 {
        dot / (mag_a * mag_b)
    } else {
        0.0
    }
}

fn normalize(vec: &mut [f32]) {
    let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vec.iter_mut().for_each(|x| *x /= magnitude);
    }
}

/// Build a unit vector with an exact cosine similarity to `base`.
///
/// Useful for scripting search scores in tests.
pub fn vector_with_cosine(base: &[f32], similarity: f32) -> Vec<f32> {
    let mut unit = base.to_vec();
    normalize(&mut unit);

    // Any vector not parallel to base works as the orthogonal seed.
    let mut seed = vec![0.0; unit.len()];
    if unit.len() > 1 {
        seed[0] = unit[1];
        seed[1] = -unit[0];
    }
    if seed.iter().all(|v| v.abs() < f32::EPSILON) {
        seed[0] = 1.0;
    }
    let projection: f32 = seed.iter().zip(unit.iter()).map(|(s, u)| s * u).sum();
    let mut ortho: Vec<f32> = seed
        .iter()
        .zip(unit.iter())
        .map(|(s, u)| s - projection * u)
        .collect();
    normalize(&mut ortho);

    let sim = similarity.clamp(-1.0, 1.0);
    let residual = (1.0 - sim * sim).max(0.0).sqrt();
    let mut out: Vec<f32> = unit
        .iter()
        .zip(ortho.iter())
        .map(|(u, o)| sim * u + residual * o)
        .collect();
    normalize(&mut out);
    out
}

// =============================================================================
// MOCK EMBEDDING BACKEND
// =============================================================================

/// Deterministic embedding backend for tests.
///
/// The same text always produces the same unit vector; specific inputs can
/// be pinned to explicit vectors for scripted similarity scores.
pub struct MockEmbeddingBackend {
    dimension: usize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    call_log: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self::with_dimension(janus_core::defaults::EMBED_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            overrides: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Pin an exact vector for a specific input text.
    pub fn set_vector_for(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.overrides.lock().unwrap().insert(text.into(), vector);
    }

    /// Make the next `n` embed calls fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of embed calls observed so far.
    pub fn embed_call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// All texts embedded so far, in order.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    /// Generate a deterministic unit embedding from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        normalize(&mut vec);
        vec
    }
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        {
            let mut log = self.call_log.lock().unwrap();
            log.extend(texts.iter().cloned());
        }

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Embedding("injected failure".to_string()));
        }

        let overrides = self.overrides.lock().unwrap();
        Ok(texts
            .iter()
            .map(|t| {
                overrides
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| Self::generate(t, self.dimension))
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

// =============================================================================
// MEMORY VECTOR INDEX
// =============================================================================

/// Exact-scan vector index for tests and embedded deployments.
pub struct MemoryVectorIndex {
    dimension: usize,
    points: Mutex<HashMap<Uuid, (Vec<f32>, JsonValue)>>,
    latency: Mutex<Option<Duration>>,
    fail_next_upserts: AtomicUsize,
    search_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            fail_next_upserts: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    /// Add artificial latency to every search (for deadline tests).
    pub fn set_search_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Make the next `n` upserts fail with a vector backend error.
    pub fn fail_next_upserts(&self, n: usize) {
        self.fail_next_upserts.store(n, Ordering::SeqCst);
    }

    pub fn search_call_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_call_count(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.points.lock().unwrap().contains_key(&id)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(
        &self,
        _name: &str,
        dim: usize,
        _metric: DistanceMetric,
    ) -> Result<()> {
        if dim != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: dim,
            });
        }
        Ok(())
    }

    async fn upsert(&self, id: Uuid, vector: &[f32], payload: JsonValue) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_dimension(vector)?;

        let remaining = self.fail_next_upserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_upserts.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::VectorBackend("injected upsert failure".to_string()));
        }

        self.points
            .lock()
            .unwrap()
            .insert(id, (vector.to_vec(), payload));
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.points.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        Ok(self.points.lock().unwrap().get(&id).map(|(v, _)| v.clone()))
    }

    async fn search(&self, vector: &[f32], k: usize, threshold: f32) -> Result<Vec<ScoredPoint>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_dimension(vector)?;

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut hits: Vec<ScoredPoint> = {
            let points = self.points.lock().unwrap();
            points
                .iter()
                .map(|(id, (v, payload))| ScoredPoint {
                    id: *id,
                    score: cosine_similarity(vector, v),
                    payload: payload.clone(),
                })
                .filter(|hit| hit.score >= threshold)
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

// =============================================================================
// MEMORY RELATIONAL STORE
// =============================================================================

/// Tiny relational engine stand-in.
///
/// Holds tables of JSON rows, answers `execute` from canned responses (or a
/// plain `FROM <table>` scan), and supports the synchronizer's change-feed
/// surface faithfully. A test double in the spirit of the mock inference
/// backend, not a SQL engine.
pub struct MemoryRelationalStore {
    inner: Mutex<RelationalInner>,
    latency: Mutex<Option<Duration>>,
    sql_calls: AtomicUsize,
}

#[derive(Default)]
struct RelationalInner {
    tables: HashMap<String, Vec<SqlRow>>,
    canned: HashMap<String, Vec<SqlRow>>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelationalInner::default()),
            latency: Mutex::new(None),
            sql_calls: AtomicUsize::new(0),
        }
    }

    /// Register a fixed response for an exact SQL string.
    pub fn set_canned_response(&self, sql: impl Into<String>, rows: Vec<SqlRow>) {
        self.inner.lock().unwrap().canned.insert(sql.into(), rows);
    }

    /// Add artificial latency to every `execute` (for deadline tests).
    pub fn set_execute_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Insert a row into a table.
    pub fn insert_row(&self, table: &str, row: SqlRow) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Number of `execute` calls observed so far.
    pub fn sql_call_count(&self) -> usize {
        self.sql_calls.load(Ordering::SeqCst)
    }

    /// Current rows of a table.
    pub fn table_rows(&self, table: &str) -> Vec<SqlRow> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Extract the table name following the first FROM token.
    fn table_from_sql(sql: &str) -> Option<String> {
        let mut tokens = sql.split_whitespace();
        while let Some(token) = tokens.next() {
            if token.eq_ignore_ascii_case("from") {
                return tokens
                    .next()
                    .map(|t| t.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_'))
                    .map(|t| t.to_string());
            }
        }
        None
    }
}

impl Default for MemoryRelationalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn execute(&self, sql: &str, _params: &[JsonValue]) -> Result<Vec<SqlRow>> {
        self.sql_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let inner = self.inner.lock().unwrap();
        if let Some(rows) = inner.canned.get(sql) {
            return Ok(rows.clone());
        }
        if let Some(table) = Self::table_from_sql(sql) {
            if let Some(rows) = inner.tables.get(&table) {
                return Ok(rows.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn execute_command(&self, _sql: &str, _params: &[JsonValue]) -> Result<u64> {
        self.sql_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn changed_rows(
        &self,
        table: &str,
        pk_column: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SqlRow>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<SqlRow> = inner
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.updated_at().map(|ts| ts > since).unwrap_or(false))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            let ka = (a.updated_at(), a.get(pk_column).map(|v| v.to_string()));
            let kb = (b.updated_at(), b.get(pk_column).map(|v| v.to_string()));
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn fetch_row(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
    ) -> Result<Option<SqlRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| row.get(pk_column) == Some(pk))
                .cloned()
        }))
    }

    async fn write_back(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
        assignments: &[(String, JsonValue)],
    ) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let rows = match inner.tables.get_mut(table) {
            Some(rows) => rows,
            None => return Ok(0),
        };
        let mut affected = 0;
        for row in rows.iter_mut() {
            if row.get(pk_column) == Some(pk) {
                for (column, value) in assignments {
                    row.columns.insert(column.clone(), value.clone());
                }
                row.columns.insert(
                    "updated_at".to_string(),
                    JsonValue::String(Utc::now().to_rfc3339()),
                );
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

// =============================================================================
// MEMORY QUERY CACHE
// =============================================================================

/// HashMap-backed query cache with TTL expiry.
pub struct MemoryQueryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryCache for MemoryQueryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        true
    }
}

// =============================================================================
// MEMORY SINKS AND STATE STORES
// =============================================================================

/// Query log sink collecting entries in memory.
#[derive(Default)]
pub struct MemoryQueryLogSink {
    entries: Mutex<Vec<QueryLogEntry>>,
}

impl MemoryQueryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueryLogSink for MemoryQueryLogSink {
    async fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Checkpoint store keeping the latest checkpoint per (direction, scope).
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<(SyncDirection, String), SyncCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, direction: SyncDirection, scope: &str) -> Result<Option<SyncCheckpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .get(&(direction, scope.to_string()))
            .cloned())
    }

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.checkpoints.lock().unwrap().insert(
            (checkpoint.direction, checkpoint.scope.clone()),
            checkpoint.clone(),
        );
        Ok(())
    }
}

/// Evolution state store holding the singleton in memory.
#[derive(Default)]
pub struct MemoryEvolutionStateStore {
    state: Mutex<Option<EvolutionState>>,
}

impl MemoryEvolutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<EvolutionState> {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvolutionStateStore for MemoryEvolutionStateStore {
    async fn load(&self) -> Result<Option<EvolutionState>> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, state: &EvolutionState) -> Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

/// Build a `SqlRow` from column/value pairs (test helper).
pub fn sql_row(pairs: &[(&str, JsonValue)]) -> SqlRow {
    let mut columns = JsonMap::new();
    for (name, value) in pairs {
        columns.insert((*name).to_string(), value.clone());
    }
    SqlRow::new(columns)
}

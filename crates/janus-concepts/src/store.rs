//! The Concept Store: the single writer over the vector and metadata backends.
//!
//! Atomicity contract between the two backing stores: vectors are written
//! first, metadata second; on metadata failure the just-written vector is
//! deleted. A successful `create` implies both writes observed; a failure
//! implies neither remains.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use janus_core::{
    defaults, Concept, ConceptPatch, ConceptRepository, EmbeddingBackend, Error, NewConcept,
    Relation, RelationType, Result, ScoredConcept, VectorIndex,
};

use crate::graph::{self, Subgraph};
use crate::strength::concept_strength;

/// Input for a semantic search: raw text or a precomputed vector.
#[derive(Debug, Clone)]
pub enum SearchInput {
    Text(String),
    Vector(Vec<f32>),
}

/// Per-id async locks serializing concept writes.
///
/// Two concurrent updates to the same concept are totally ordered; updates
/// to different concepts may interleave.
struct KeyedLocks {
    inner: std::sync::Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Retry an idempotent upstream operation with bounded backoff.
///
/// One initial attempt plus one retry per backoff entry; exhausted upstream
/// errors surface as `UpstreamUnavailable`.
async fn with_retries<T, F, Fut>(op: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < defaults::RETRY_BACKOFF_MS.len() => {
                let delay = defaults::RETRY_BACKOFF_MS[attempt];
                attempt += 1;
                warn!(
                    subsystem = "concepts",
                    op,
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "Upstream call failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) if e.is_retryable() => return Err(e.into_unavailable()),
            Err(e) => return Err(e),
        }
    }
}

/// The Concept Store. Owns exclusive write access to both backends; no
/// other component writes them directly.
pub struct ConceptStore {
    repo: Arc<dyn ConceptRepository>,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingBackend>,
    locks: KeyedLocks,
}

impl ConceptStore {
    pub fn new(
        repo: Arc<dyn ConceptRepository>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            repo,
            index,
            embeddings,
            locks: KeyedLocks::new(),
        }
    }

    /// Deployment embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    /// Create the backing vector collection if it does not exist yet.
    pub async fn ensure_collection(&self, name: &str) -> Result<()> {
        with_retries("ensure_collection", || {
            self.index
                .ensure_collection(name, self.dimension(), janus_core::DistanceMetric::Cosine)
        })
        .await
    }

    fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        let expected = self.dimension();
        if vector.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if !vector.iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidInput(
                "Vector contains non-finite components".to_string(),
            ));
        }
        Ok(())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut vectors =
            with_retries("embed", || self.embeddings.embed_texts(&texts)).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::Embedding("Backend returned no embedding".to_string()))?;
        self.validate_vector(&vector)?;
        Ok(vector)
    }

    fn vector_payload(concept: &Concept) -> serde_json::Value {
        let mut payload = json!({ "name": concept.name });
        if let Some(source_key) = concept.source_key() {
            payload["source_key"] = json!(source_key);
        }
        payload
    }

    /// Create a concept. Generates the id when absent and computes the
    /// vector when not supplied.
    #[instrument(skip(self, new), fields(subsystem = "concepts", component = "store", op = "create"))]
    pub async fn create(&self, new: NewConcept) -> Result<Concept> {
        if new.name.trim().is_empty() {
            return Err(Error::InvalidInput("Concept name is required".to_string()));
        }
        if new.name.len() > defaults::NAME_MAX_BYTES {
            return Err(Error::InvalidInput(format!(
                "Concept name exceeds {} bytes",
                defaults::NAME_MAX_BYTES
            )));
        }
        if new.description.len() > defaults::DESCRIPTION_MAX_BYTES {
            return Err(Error::InvalidInput(format!(
                "Concept description exceeds {} bytes",
                defaults::DESCRIPTION_MAX_BYTES
            )));
        }

        let id = new.id.unwrap_or_else(Uuid::new_v4);
        let now = Utc::now();
        let mut concept = Concept {
            id,
            name: new.name,
            description: new.description,
            vector: None,
            metadata: new.metadata,
            usage_count: 0,
            strength: concept_strength(0, 0, 0.0),
            created_at: now,
            updated_at: now,
        };

        let vector = match new.vector {
            Some(vector) => {
                self.validate_vector(&vector)?;
                vector
            }
            None => self.embed_one(&concept.embedding_text()).await?,
        };

        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let payload = Self::vector_payload(&concept);
        with_retries("vector_upsert", || {
            self.index.upsert(id, &vector, payload.clone())
        })
        .await?;

        if let Err(metadata_err) = self.repo.insert(&concept).await {
            // Compensate so neither write remains.
            if let Err(cleanup_err) =
                with_retries("vector_compensate", || self.index.delete(id)).await
            {
                warn!(
                    concept_id = %id,
                    error = %cleanup_err,
                    "Failed to compensate vector write after metadata failure"
                );
            }
            return Err(metadata_err);
        }

        info!(concept_id = %id, "Concept created");
        concept.vector = Some(vector);
        Ok(concept)
    }

    /// Fetch a concept with its stored vector attached.
    pub async fn get(&self, id: Uuid) -> Result<Concept> {
        let mut concept = self
            .repo
            .fetch(id)
            .await?
            .ok_or(Error::ConceptNotFound(id))?;

        match with_retries("vector_fetch", || self.index.fetch(id)).await {
            Ok(vector) => concept.vector = vector,
            Err(e) => {
                warn!(concept_id = %id, error = %e, "Vector fetch failed, returning metadata only");
            }
        }
        Ok(concept)
    }

    /// Apply a partial update. Name or description changes re-embed; pure
    /// metadata changes do not.
    #[instrument(skip(self, patch), fields(subsystem = "concepts", component = "store", op = "update", concept_id = %id))]
    pub async fn update(&self, id: Uuid, patch: ConceptPatch) -> Result<Concept> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut concept = self
            .repo
            .fetch(id)
            .await?
            .ok_or(Error::ConceptNotFound(id))?;

        let reembed = patch.triggers_reembedding();
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("Concept name is required".to_string()));
            }
            concept.name = name;
        }
        if let Some(description) = patch.description {
            concept.description = description;
        }
        if let Some(metadata) = patch.metadata {
            for (key, value) in metadata {
                concept.metadata.insert(key, value);
            }
        }
        concept.updated_at = Utc::now().max(concept.created_at);

        if reembed {
            let vector = self.embed_one(&concept.embedding_text()).await?;
            let payload = Self::vector_payload(&concept);
            with_retries("vector_upsert", || {
                self.index.upsert(id, &vector, payload.clone())
            })
            .await?;
            concept.vector = Some(vector);
        }

        let relations = self.repo.relations_of(id).await?;
        concept.strength = strength_from_relations(concept.usage_count, &relations);
        self.repo.update(&concept).await?;

        if concept.vector.is_none() {
            concept.vector = with_retries("vector_fetch", || self.index.fetch(id))
                .await
                .unwrap_or(None);
        }
        Ok(concept)
    }

    /// Delete a concept, its vector, and every incident relation.
    #[instrument(skip(self), fields(subsystem = "concepts", component = "store", op = "delete", concept_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        if self.repo.fetch(id).await?.is_none() {
            return Err(Error::ConceptNotFound(id));
        }

        with_retries("vector_delete", || self.index.delete(id)).await?;
        self.repo.delete(id).await?;
        info!(concept_id = %id, "Concept deleted");
        Ok(())
    }

    /// Semantic search over the vector index. Returns up to `k` concepts
    /// with cosine similarity `>= threshold`, sorted descending. Usage of
    /// returned concepts is recorded.
    #[instrument(skip(self, input), fields(subsystem = "concepts", component = "store", op = "semantic_search", k = k))]
    pub async fn semantic_search(
        &self,
        input: SearchInput,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredConcept>> {
        let vector = match input {
            SearchInput::Vector(vector) => {
                self.validate_vector(&vector)?;
                vector
            }
            SearchInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::EmptyQuery);
                }
                self.embed_one(&text).await?
            }
        };

        let hits = with_retries("vector_search", || self.index.search(&vector, k, threshold))
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            // The index can briefly hold points whose metadata write was
            // compensated; skip them.
            if let Some(mut concept) = self.repo.fetch(hit.id).await? {
                if let Err(e) = self.repo.record_usage(hit.id).await {
                    warn!(concept_id = %hit.id, error = %e, "Usage tracking failed");
                } else {
                    concept.usage_count += 1;
                }
                results.push(ScoredConcept {
                    concept,
                    score: hit.score,
                });
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.concept.id.cmp(&b.concept.id))
        });
        debug!(result_count = results.len(), "Semantic search complete");
        Ok(results)
    }

    /// Create or strengthen a relation. Endpoints must exist and differ;
    /// a duplicate `(source, target, kind)` keeps the higher strength.
    pub async fn add_relation(
        &self,
        source: Uuid,
        target: Uuid,
        kind: RelationType,
        strength: f32,
    ) -> Result<Relation> {
        if source == target {
            return Err(Error::InvalidRelation(
                "Relation endpoints must differ".to_string(),
            ));
        }
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(Error::InvalidRelation(format!(
                "Relation strength must be in (0, 1], got {}",
                strength
            )));
        }
        if self.repo.fetch(source).await?.is_none() {
            return Err(Error::ConceptNotFound(source));
        }
        if self.repo.fetch(target).await?.is_none() {
            return Err(Error::ConceptNotFound(target));
        }

        let relation = Relation {
            source_id: source,
            target_id: target,
            kind,
            strength,
            created_at: Utc::now(),
        };
        self.repo.upsert_relation(&relation).await?;

        // Strength recompute is synchronous for the touched endpoints and
        // best-effort beyond that.
        for id in [source, target] {
            if let Err(e) = self.recompute_strength(id).await {
                warn!(concept_id = %id, error = %e, "Strength recompute failed");
            }
        }
        Ok(relation)
    }

    /// Remove a relation.
    pub async fn remove_relation(
        &self,
        source: Uuid,
        target: Uuid,
        kind: RelationType,
    ) -> Result<()> {
        self.repo.remove_relation(source, target, kind).await?;
        for id in [source, target] {
            if let Err(e) = self.recompute_strength(id).await {
                warn!(concept_id = %id, error = %e, "Strength recompute failed");
            }
        }
        Ok(())
    }

    /// Graph neighborhood of a concept, up to `depth <= 3` hops.
    pub async fn neighbors(&self, id: Uuid, depth: usize) -> Result<Subgraph> {
        graph::neighbors(self.repo.as_ref(), id, depth).await
    }

    /// Merge `loser` into `winner`: all relations pointing at the loser are
    /// redirected to the winner (duplicate edges collapse, higher strength
    /// wins), then the loser is deleted.
    #[instrument(skip(self), fields(subsystem = "concepts", component = "store", op = "merge", loser = %loser, winner = %winner))]
    pub async fn merge(&self, loser: Uuid, winner: Uuid) -> Result<Concept> {
        if loser == winner {
            return Err(Error::InvalidInput(
                "Cannot merge a concept into itself".to_string(),
            ));
        }

        // Lock in id order so concurrent merges cannot deadlock.
        let (first, second) = if loser < winner {
            (loser, winner)
        } else {
            (winner, loser)
        };
        let first_lock = self.locks.lock_for(first);
        let second_lock = self.locks.lock_for(second);
        let _first_guard = first_lock.lock().await;
        let _second_guard = second_lock.lock().await;

        let loser_concept = self
            .repo
            .fetch(loser)
            .await?
            .ok_or(Error::ConceptNotFound(loser))?;
        let mut winner_concept = self
            .repo
            .fetch(winner)
            .await?
            .ok_or(Error::ConceptNotFound(winner))?;

        let loser_relations = self.repo.relations_of(loser).await?;
        for relation in &loser_relations {
            let source = if relation.source_id == loser {
                winner
            } else {
                relation.source_id
            };
            let target = if relation.target_id == loser {
                winner
            } else {
                relation.target_id
            };
            if source == target {
                continue;
            }
            self.repo
                .upsert_relation(&Relation {
                    source_id: source,
                    target_id: target,
                    kind: relation.kind,
                    strength: relation.strength,
                    created_at: relation.created_at,
                })
                .await?;
        }

        with_retries("vector_delete", || self.index.delete(loser)).await?;
        self.repo.delete(loser).await?;

        winner_concept.usage_count += loser_concept.usage_count;
        winner_concept.updated_at = Utc::now();
        let relations = self.repo.relations_of(winner).await?;
        winner_concept.strength =
            strength_from_relations(winner_concept.usage_count, &relations);
        self.repo.update(&winner_concept).await?;

        info!(
            redirected = loser_relations.len(),
            "Concept merge complete"
        );
        self.get(winner).await
    }

    /// Concept carrying the given synchronizer source key, if any.
    pub async fn find_by_source_key(&self, source_key: &str) -> Result<Option<Concept>> {
        self.repo.find_by_source_key(source_key).await
    }

    /// Concepts whose metadata changed after `since`, oldest first.
    pub async fn updated_since(
        &self,
        since: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Concept>> {
        self.repo.updated_since(since, limit).await
    }

    /// Number of stored concepts.
    pub async fn count(&self) -> Result<i64> {
        self.repo.count().await
    }

    async fn recompute_strength(&self, id: Uuid) -> Result<()> {
        let mut concept = match self.repo.fetch(id).await? {
            Some(concept) => concept,
            None => return Ok(()),
        };
        let relations = self.repo.relations_of(id).await?;
        concept.strength = strength_from_relations(concept.usage_count, &relations);
        self.repo.update(&concept).await
    }
}

fn strength_from_relations(usage_count: i64, relations: &[Relation]) -> f32 {
    let degree = relations.len();
    let avg_edge = if degree > 0 {
        relations.iter().map(|r| r.strength).sum::<f32>() / degree as f32
    } else {
        0.0
    };
    concept_strength(usage_count, degree, avg_edge)
}

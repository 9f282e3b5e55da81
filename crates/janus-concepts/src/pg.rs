//! PostgreSQL repositories for concept metadata, query logs, sync
//! checkpoints, and the evolution singleton.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use janus_core::{
    CheckpointStore, Concept, ConceptRepository, Error, EvolutionState, EvolutionStateStore,
    QueryLogEntry, QueryLogSink, Relation, RelationType, Result, SyncCheckpoint, SyncDirection,
};

/// Create the gateway-owned tables when they do not exist.
pub async fn ensure_schema(pool: &Pool<Postgres>) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS concept (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            usage_count BIGINT NOT NULL DEFAULT 0,
            strength REAL NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS concept_source_key_idx
            ON concept ((metadata->>'source_key'))",
        "CREATE TABLE IF NOT EXISTS concept_relation (
            source_id UUID NOT NULL REFERENCES concept(id) ON DELETE CASCADE,
            target_id UUID NOT NULL REFERENCES concept(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            strength REAL NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (source_id, target_id, kind)
        )",
        "CREATE TABLE IF NOT EXISTS query_log (
            id UUID PRIMARY KEY,
            tenant TEXT NOT NULL,
            query TEXT NOT NULL,
            kind TEXT,
            confidence REAL NOT NULL DEFAULT 0,
            sql_latency_ms BIGINT,
            semantic_latency_ms BIGINT,
            result_count BIGINT NOT NULL DEFAULT 0,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS sync_checkpoint (
            direction TEXT NOT NULL,
            scope TEXT NOT NULL,
            last_updated_at TIMESTAMPTZ NOT NULL,
            last_id TEXT NOT NULL,
            row_hash TEXT NOT NULL,
            PRIMARY KEY (direction, scope)
        )",
        "CREATE TABLE IF NOT EXISTS evolution_state (
            id INT PRIMARY KEY CHECK (id = 1),
            phase INT NOT NULL,
            concept_ratio REAL NOT NULL,
            counters JSONB NOT NULL DEFAULT '{}'::jsonb,
            updated_at TIMESTAMPTZ NOT NULL
        )",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }
    Ok(())
}

fn decode_concept(row: &PgRow) -> Result<Concept> {
    let metadata: JsonValue = row.try_get("metadata")?;
    Ok(Concept {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        vector: None,
        metadata: metadata.as_object().cloned().unwrap_or_default(),
        usage_count: row.try_get("usage_count")?,
        strength: row.try_get("strength")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_relation(row: &PgRow) -> Result<Relation> {
    let kind: String = row.try_get("kind")?;
    let kind: RelationType = kind
        .parse()
        .map_err(|e: String| Error::Serialization(e))?;
    Ok(Relation {
        source_id: row.try_get("source_id")?,
        target_id: row.try_get("target_id")?,
        kind,
        strength: row.try_get("strength")?,
        created_at: row.try_get("created_at")?,
    })
}

/// PostgreSQL implementation of the concept metadata repository.
pub struct PgConceptRepository {
    pool: Pool<Postgres>,
}

impl PgConceptRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConceptRepository for PgConceptRepository {
    async fn insert(&self, concept: &Concept) -> Result<()> {
        sqlx::query(
            "INSERT INTO concept
                 (id, name, description, metadata, usage_count, strength, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(concept.id)
        .bind(&concept.name)
        .bind(&concept.description)
        .bind(JsonValue::Object(concept.metadata.clone()))
        .bind(concept.usage_count)
        .bind(concept.strength)
        .bind(concept.created_at)
        .bind(concept.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Concept>> {
        let row = sqlx::query("SELECT * FROM concept WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        row.as_ref().map(decode_concept).transpose()
    }

    async fn update(&self, concept: &Concept) -> Result<()> {
        let result = sqlx::query(
            "UPDATE concept
             SET name = $2, description = $3, metadata = $4, usage_count = $5,
                 strength = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(concept.id)
        .bind(&concept.name)
        .bind(&concept.description)
        .bind(JsonValue::Object(concept.metadata.clone()))
        .bind(concept.usage_count)
        .bind(concept.strength)
        .bind(concept.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::ConceptNotFound(concept.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;

        sqlx::query("DELETE FROM concept_relation WHERE source_id = $1 OR target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;

        sqlx::query("DELETE FROM concept WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM concept")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(count)
    }

    async fn record_usage(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE concept SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(())
    }

    async fn find_by_source_key(&self, source_key: &str) -> Result<Option<Concept>> {
        let row = sqlx::query("SELECT * FROM concept WHERE metadata->>'source_key' = $1 LIMIT 1")
            .bind(source_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        row.as_ref().map(decode_concept).transpose()
    }

    async fn updated_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Concept>> {
        let rows = sqlx::query(
            "SELECT * FROM concept WHERE updated_at > $1 ORDER BY updated_at ASC, id ASC LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        rows.iter().map(decode_concept).collect()
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<()> {
        sqlx::query(
            "INSERT INTO concept_relation (source_id, target_id, kind, strength, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (source_id, target_id, kind)
             DO UPDATE SET strength = GREATEST(concept_relation.strength, EXCLUDED.strength)",
        )
        .bind(relation.source_id)
        .bind(relation.target_id)
        .bind(relation.kind.to_string())
        .bind(relation.strength)
        .bind(relation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(())
    }

    async fn remove_relation(&self, source: Uuid, target: Uuid, kind: RelationType) -> Result<()> {
        sqlx::query(
            "DELETE FROM concept_relation
             WHERE source_id = $1 AND target_id = $2 AND kind = $3",
        )
        .bind(source)
        .bind(target)
        .bind(kind.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        Ok(())
    }

    async fn relations_of(&self, id: Uuid) -> Result<Vec<Relation>> {
        let rows = sqlx::query(
            "SELECT * FROM concept_relation
             WHERE source_id = $1 OR target_id = $1
             ORDER BY source_id, target_id, kind",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::MetadataBackend(e.to_string()))?;
        rows.iter().map(decode_relation).collect()
    }
}

/// PostgreSQL query log sink.
pub struct PgQueryLogSink {
    pool: Pool<Postgres>,
}

impl PgQueryLogSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryLogSink for PgQueryLogSink {
    async fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_log
                 (id, tenant, query, kind, confidence, sql_latency_ms,
                  semantic_latency_ms, result_count, error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(&entry.tenant)
        .bind(&entry.query)
        .bind(entry.kind.map(|k| k.to_string()))
        .bind(entry.confidence)
        .bind(entry.sql_latency_ms.map(|v| v as i64))
        .bind(entry.semantic_latency_ms.map(|v| v as i64))
        .bind(entry.result_count)
        .bind(&entry.error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// PostgreSQL sync checkpoint store.
pub struct PgCheckpointStore {
    pool: Pool<Postgres>,
}

impl PgCheckpointStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, direction: SyncDirection, scope: &str) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query(
            "SELECT last_updated_at, last_id, row_hash
             FROM sync_checkpoint WHERE direction = $1 AND scope = $2",
        )
        .bind(direction.to_string())
        .bind(scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(match row {
            Some(row) => Some(SyncCheckpoint {
                direction,
                scope: scope.to_string(),
                last_updated_at: row.try_get("last_updated_at")?,
                last_id: row.try_get("last_id")?,
                row_hash: row.try_get("row_hash")?,
            }),
            None => None,
        })
    }

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_checkpoint (direction, scope, last_updated_at, last_id, row_hash)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (direction, scope)
             DO UPDATE SET last_updated_at = EXCLUDED.last_updated_at,
                           last_id = EXCLUDED.last_id,
                           row_hash = EXCLUDED.row_hash",
        )
        .bind(checkpoint.direction.to_string())
        .bind(&checkpoint.scope)
        .bind(checkpoint.last_updated_at)
        .bind(&checkpoint.last_id)
        .bind(&checkpoint.row_hash)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// PostgreSQL store for the evolution singleton.
pub struct PgEvolutionStateStore {
    pool: Pool<Postgres>,
}

impl PgEvolutionStateStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EvolutionStateStore for PgEvolutionStateStore {
    async fn load(&self) -> Result<Option<EvolutionState>> {
        let row = sqlx::query(
            "SELECT phase, concept_ratio, counters, updated_at FROM evolution_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(match row {
            Some(row) => {
                let phase: i32 = row.try_get("phase")?;
                let phase = janus_core::Phase::from_number(phase as u8)
                    .ok_or_else(|| Error::Serialization(format!("Invalid phase: {}", phase)))?;
                let counters: JsonValue = row.try_get("counters")?;
                Some(EvolutionState {
                    phase,
                    concept_ratio: row.try_get("concept_ratio")?,
                    counters: serde_json::from_value(counters).unwrap_or_default(),
                    updated_at: row.try_get("updated_at")?,
                })
            }
            None => None,
        })
    }

    async fn save(&self, state: &EvolutionState) -> Result<()> {
        sqlx::query(
            "INSERT INTO evolution_state (id, phase, concept_ratio, counters, updated_at)
             VALUES (1, $1, $2, $3, $4)
             ON CONFLICT (id)
             DO UPDATE SET phase = EXCLUDED.phase,
                           concept_ratio = EXCLUDED.concept_ratio,
                           counters = EXCLUDED.counters,
                           updated_at = EXCLUDED.updated_at",
        )
        .bind(state.phase.number() as i32)
        .bind(state.concept_ratio)
        .bind(serde_json::to_value(state.counters)?)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

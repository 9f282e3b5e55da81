//! Synchronizer behavior over the in-memory backends.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use janus_backends::{
    sql_row, MemoryCheckpointStore, MemoryRelationalStore, MemoryVectorIndex,
    MockEmbeddingBackend,
};
use janus_concepts::{ConceptStore, MemoryConceptRepository, SearchInput};
use janus_core::{CheckpointStore, ConceptPatch, ConflictPolicy, RelationalStore, SyncDirection};
use janus_sync::{MappingRule, SyncWorker, SyncWorkerConfig, Synchronizer};

const DIM: usize = 16;

struct Fixture {
    relational: Arc<MemoryRelationalStore>,
    embeddings: Arc<MockEmbeddingBackend>,
    concepts: Arc<ConceptStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
}

fn fixture() -> Fixture {
    let relational = Arc::new(MemoryRelationalStore::new());
    let index = Arc::new(MemoryVectorIndex::new(DIM));
    let embeddings = Arc::new(MockEmbeddingBackend::with_dimension(DIM));
    let repo = Arc::new(MemoryConceptRepository::new());
    let concepts = Arc::new(ConceptStore::new(repo, index, embeddings.clone()));
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    Fixture {
        relational,
        embeddings,
        concepts,
        checkpoints,
    }
}

fn customer_rule() -> MappingRule {
    MappingRule::new("customers", "id", "name")
        .with_description_columns(vec!["bio".to_string()])
        .with_metadata_columns(vec!["tier".to_string()])
        .with_writeback_columns(vec!["name".to_string(), "bio".to_string()])
}

fn synchronizer(f: &Fixture, rule: MappingRule) -> Synchronizer {
    Synchronizer::new(
        f.relational.clone(),
        f.concepts.clone(),
        f.checkpoints.clone(),
        vec![rule],
    )
}

fn seed_customer(f: &Fixture, id: i64, name: &str, bio: &str) {
    f.relational.insert_row(
        "customers",
        sql_row(&[
            ("id", json!(id)),
            ("name", json!(name)),
            ("bio", json!(bio)),
            ("tier", json!("gold")),
            ("updated_at", json!(Utc::now().to_rfc3339())),
        ]),
    );
}

#[tokio::test]
async fn forward_extracts_concepts_from_rows() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    seed_customer(&f, 2, "Grace", "Compiler pioneer");
    let sync = synchronizer(&f, customer_rule());

    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(f.concepts.count().await.unwrap(), 2);

    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada.name, "Ada");
    assert_eq!(ada.description, "First programmer");
    assert_eq!(ada.metadata.get("tier"), Some(&json!("gold")));
    assert_eq!(ada.metadata.get("mapping_rule"), Some(&json!("customers")));

    // The synced concept is searchable.
    let hits = f
        .concepts
        .semantic_search(SearchInput::Text("Ada: First programmer".to_string()), 5, 0.5)
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.concept.id == ada.id));
}

/// Invariant 7: applying the same input batch twice yields the same state.
#[tokio::test]
async fn forward_is_idempotent() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());

    let first = sync.run_forward().await.unwrap();
    assert_eq!(first.applied, 1);
    let embeds_after_first = f.embeddings.embed_call_count();

    let second = sync.run_forward().await.unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(f.concepts.count().await.unwrap(), 1);
    // No re-embedding happened for unchanged rows.
    assert_eq!(f.embeddings.embed_call_count(), embeds_after_first);
}

#[tokio::test]
async fn forward_updates_changed_rows_in_place() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());
    sync.run_forward().await.unwrap();

    // Change the row content and bump its timestamp.
    f.relational
        .write_back(
            "customers",
            "id",
            &json!(1),
            &[("bio".to_string(), json!("Analytical Engine notes"))],
        )
        .await
        .unwrap();

    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(f.concepts.count().await.unwrap(), 1);

    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada.description, "Analytical Engine notes");
}

#[tokio::test]
async fn forward_resumes_from_checkpoint() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());
    sync.run_forward().await.unwrap();

    let checkpoint = f
        .checkpoints
        .load(SyncDirection::Forward, "customers")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_id, "1");
    assert!(!checkpoint.row_hash.is_empty());

    // A later row lands after the checkpoint; only it is fetched next run.
    f.relational.insert_row(
        "customers",
        sql_row(&[
            ("id", json!(2)),
            ("name", json!("Grace")),
            ("bio", json!("Compiler pioneer")),
            (
                "updated_at",
                json!((Utc::now() + Duration::seconds(5)).to_rfc3339()),
            ),
        ]),
    );

    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(f.concepts.count().await.unwrap(), 2);
}

#[tokio::test]
async fn forward_batch_aborts_on_failure_and_retries_cleanly() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    seed_customer(&f, 2, "Grace", "Compiler pioneer");
    let sync = synchronizer(&f, customer_rule());

    // Embedding fails through the whole retry budget for the first row.
    f.embeddings.fail_next(4);
    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 0);

    // The checkpoint did not advance, so the retry applies everything.
    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(f.concepts.count().await.unwrap(), 2);
}

#[tokio::test]
async fn backpressure_halves_and_recovers_batch_size() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule()).with_batch_cap(8);
    assert_eq!(sync.batch_size().await, 8);

    // One failing item out of one is a 100% failure window.
    f.embeddings.fail_next(4);
    sync.run_forward().await.unwrap();
    assert_eq!(sync.batch_size().await, 4);

    // Five consecutive clean windows double it back (capped).
    for _ in 0..5 {
        sync.run_forward().await.unwrap();
    }
    assert_eq!(sync.batch_size().await, 8);
}

#[tokio::test]
async fn backward_writes_back_whitelisted_columns() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());
    sync.run_forward().await.unwrap();
    // Drain the backward pipeline of the forward-created concepts.
    sync.run_backward().await.unwrap();

    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    f.concepts
        .update(
            ada.id,
            ConceptPatch {
                name: Some("Ada Lovelace".to_string()),
                ..ConceptPatch::default()
            },
        )
        .await
        .unwrap();

    let report = sync.run_backward().await.unwrap();
    assert_eq!(report.applied, 1);

    let row = f
        .relational
        .fetch_row("customers", "id", &json!(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("name"), Some(&json!("Ada Lovelace")));
    // Non-whitelisted columns are untouched.
    assert_eq!(row.get("tier"), Some(&json!("gold")));
}

#[tokio::test]
async fn backward_never_creates_rows() {
    let f = fixture();
    let sync = synchronizer(&f, customer_rule());

    // A concept with a source key pointing at a missing row.
    let mut metadata = serde_json::Map::new();
    metadata.insert("source_key".to_string(), json!("customers:404"));
    metadata.insert("mapping_rule".to_string(), json!("customers"));
    f.concepts
        .create(janus_core::NewConcept {
            name: "Ghost".to_string(),
            metadata,
            ..janus_core::NewConcept::default()
        })
        .await
        .unwrap();

    let report = sync.run_backward().await.unwrap();
    assert_eq!(report.applied, 0);
    assert!(f.relational.table_rows("customers").is_empty());
}

#[tokio::test]
async fn manual_policy_quarantines_conflicts() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let rule = customer_rule().with_conflict_policy(ConflictPolicy::Manual);
    let sync = synchronizer(&f, rule);
    sync.run_forward().await.unwrap();

    // Both sides change after the first sync.
    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    f.concepts
        .update(
            ada.id,
            ConceptPatch {
                description: Some("Concept-side edit".to_string()),
                ..ConceptPatch::default()
            },
        )
        .await
        .unwrap();
    f.relational
        .write_back(
            "customers",
            "id",
            &json!(1),
            &[("bio".to_string(), json!("Relational-side edit"))],
        )
        .await
        .unwrap();

    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.applied, 0);

    // The conflicting change was not applied.
    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada.description, "Concept-side edit");

    let status = sync.status().await.unwrap();
    assert_eq!(status.quarantine_count, 1);
    let staged = sync.quarantine().await;
    assert_eq!(staged[0].source_key, "customers:1");
}

#[tokio::test]
async fn last_writer_wins_applies_newer_relational_edit() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());
    sync.run_forward().await.unwrap();

    // Concept changes first, the row changes later: the row wins.
    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    f.concepts
        .update(
            ada.id,
            ConceptPatch {
                description: Some("Older concept edit".to_string()),
                ..ConceptPatch::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    f.relational
        .write_back(
            "customers",
            "id",
            &json!(1),
            &[("bio".to_string(), json!("Newer relational edit"))],
        )
        .await
        .unwrap();

    let report = sync.run_forward().await.unwrap();
    assert_eq!(report.applied, 1);

    let ada = f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada.description, "Newer relational edit");
}

#[tokio::test]
async fn worker_runs_periodic_passes_and_shuts_down() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = Arc::new(synchronizer(&f, customer_rule()));

    let worker = SyncWorker::new(
        sync.clone(),
        SyncWorkerConfig::default().with_interval_secs(1),
    );
    let handle = worker.start();

    // Give the worker one periodic pass.
    tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(f.concepts.count().await.unwrap(), 1);
    assert!(f
        .concepts
        .find_by_source_key("customers:1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn disabled_worker_does_nothing() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = Arc::new(synchronizer(&f, customer_rule()));

    let worker = SyncWorker::new(
        sync,
        SyncWorkerConfig::default()
            .with_interval_secs(1)
            .with_enabled(false),
    );
    let _handle = worker.start();

    tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
    assert_eq!(f.concepts.count().await.unwrap(), 0);
}

#[tokio::test]
async fn status_reports_checkpoints() {
    let f = fixture();
    seed_customer(&f, 1, "Ada", "First programmer");
    let sync = synchronizer(&f, customer_rule());

    let before = sync.status().await.unwrap();
    assert!(before.last_forward_checkpoint.is_none());

    sync.run_forward().await.unwrap();
    let after = sync.status().await.unwrap();
    let forward = after.last_forward_checkpoint.unwrap();
    assert_eq!(forward.scope, "customers");
    assert_eq!(forward.last_id, "1");
}

//! End-to-end gateway scenarios over the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use janus_backends::{
    sql_row, vector_with_cosine, MemoryQueryCache, MemoryQueryLogSink, MemoryRelationalStore,
    MemoryVectorIndex, MockEmbeddingBackend,
};
use janus_concepts::{MemoryConceptRepository, SearchInput};
use janus_core::{
    ConceptPatch, Error, NewConcept, Phase, QueryKind, QueryOptions, QuotaLimits, RelationType,
    RelationalStore, ResultItem, RouteObservation, SyncDirection,
};
use janus_gateway::Gateway;
use janus_sync::MappingRule;

const DIM: usize = 16;

struct Fixture {
    relational: Arc<MemoryRelationalStore>,
    index: Arc<MemoryVectorIndex>,
    embeddings: Arc<MockEmbeddingBackend>,
    log: Arc<MemoryQueryLogSink>,
    gateway: Gateway,
}

fn fixture() -> Fixture {
    let relational = Arc::new(MemoryRelationalStore::new());
    let index = Arc::new(MemoryVectorIndex::new(DIM));
    let embeddings = Arc::new(MockEmbeddingBackend::with_dimension(DIM));
    let log = Arc::new(MemoryQueryLogSink::new());

    let gateway = Gateway::builder()
        .relational(relational.clone())
        .vector_index(index.clone())
        .embeddings(embeddings.clone())
        .concept_repository(Arc::new(MemoryConceptRepository::new()))
        .query_log(log.clone())
        .cache(Arc::new(MemoryQueryCache::new()))
        .mapping_rule(
            MappingRule::new("customers", "id", "name")
                .with_description_columns(vec!["bio".to_string()])
                .with_writeback_columns(vec!["name".to_string()]),
        )
        .build()
        .unwrap();

    Fixture {
        relational,
        index,
        embeddings,
        log,
        gateway,
    }
}

async fn register_generous(f: &Fixture, tenant: &str) {
    f.gateway
        .register_tenant(
            tenant,
            QuotaLimits {
                queries_per_minute: 10_000,
                api_calls_per_second: 10_000,
                ..QuotaLimits::professional()
            },
        )
        .await;
}

/// S1: a structured SQL query runs on the relational engine alone.
#[tokio::test]
async fn s1_sql_query_routes_to_relational_only() {
    let f = fixture();
    register_generous(&f, "T1").await;
    f.relational.insert_row(
        "products",
        sql_row(&[("id", json!(1)), ("name", json!("mouse"))]),
    );

    let response = f
        .gateway
        .query(
            "T1",
            "SELECT name FROM products WHERE price < 100",
            QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Sql);
    assert_eq!(response.route.confidence, 1.0);
    assert_eq!(f.index.search_call_count(), 0);
    assert_eq!(f.embeddings.embed_call_count(), 0);
}

/// S2: a semantic query returns the similar concept with its score.
#[tokio::test]
async fn s2_semantic_query_returns_similar_concept() {
    let f = fixture();
    register_generous(&f, "T1").await;

    let query = "find products similar to noise-cancelling headphones";
    let query_vector = MockEmbeddingBackend::generate(query, DIM);
    f.embeddings.set_vector_for(query, query_vector.clone());

    let airpods = f
        .gateway
        .create_concept(
            "T1",
            NewConcept {
                name: "AirPods Pro".to_string(),
                vector: Some(vector_with_cosine(&query_vector, 0.88)),
                ..NewConcept::default()
            },
        )
        .await
        .unwrap();

    let response = f
        .gateway
        .query("T1", query, QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Semantic);
    assert!(response.route.confidence >= 0.7);
    match &response.items[0] {
        ResultItem::Concept(hit) => {
            assert_eq!(hit.concept.name, "AirPods Pro");
            assert_eq!(hit.concept.id, airpods.id);
            assert!((hit.score - 0.88).abs() < 0.01);
        }
        other => panic!("Expected a concept hit, got {:?}", other),
    }
    assert_eq!(f.relational.sql_call_count(), 0);
}

/// S3: a mixed query invokes both branches; the merge is deduped and
/// sorted by merged score.
#[tokio::test]
async fn s3_hybrid_query_merges_and_dedupes() {
    let f = fixture();
    register_generous(&f, "T1").await;
    let query = "show me expensive laptops similar to developer picks";

    f.relational.set_canned_response(
        query,
        vec![
            sql_row(&[("id", json!(1)), ("name", json!("ThinkPad"))]),
            sql_row(&[("id", json!(1)), ("name", json!("ThinkPad"))]),
        ],
    );
    let query_vector = MockEmbeddingBackend::generate(query, DIM);
    f.embeddings.set_vector_for(query, query_vector.clone());
    f.gateway
        .create_concept(
            "T1",
            NewConcept {
                name: "Framework 13".to_string(),
                vector: Some(vector_with_cosine(&query_vector, 0.8)),
                ..NewConcept::default()
            },
        )
        .await
        .unwrap();

    let response = f
        .gateway
        .query("T1", query, QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Hybrid);
    // The duplicate row collapsed; scores descend.
    assert_eq!(response.items.len(), 2);
    let scores: Vec<f32> = response.items.iter().map(|i| i.score()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

/// S4: the vector store blows the deadline while the relational side
/// answers; the rows serve with a degraded route.
#[tokio::test]
async fn s4_hybrid_degrades_on_semantic_deadline() {
    let f = fixture();
    register_generous(&f, "T1").await;
    let query = "show me expensive laptops similar to developer picks";

    f.relational.set_canned_response(
        query,
        vec![
            sql_row(&[("id", json!(1))]),
            sql_row(&[("id", json!(2))]),
            sql_row(&[("id", json!(3))]),
        ],
    );
    f.index.set_search_latency(Duration::from_millis(400));

    let response = f
        .gateway
        .query(
            "T1",
            query,
            QueryOptions {
                deadline_ms: Some(120),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.items.len(), 3);
    assert!(response.route.degraded);
    assert!(response
        .route
        .partial_error
        .as_deref()
        .unwrap()
        .contains("Deadline exceeded"));
}

/// S5: creating a concept without a vector computes one; timestamps and
/// strength are well-formed.
#[tokio::test]
async fn s5_create_concept_computes_embedding() {
    let f = fixture();
    register_generous(&f, "T1").await;
    f.gateway.bootstrap().await.unwrap();

    let created = f
        .gateway
        .create_concept(
            "T1",
            NewConcept {
                name: "Premium Customer".to_string(),
                ..NewConcept::default()
            },
        )
        .await
        .unwrap();

    let fetched = f.gateway.get_concept("T1", created.id).await.unwrap();
    assert_eq!(fetched.vector.as_ref().unwrap().len(), DIM);
    assert_eq!(fetched.updated_at, fetched.created_at);
    assert!((0.0..=1.0).contains(&fetched.strength));
}

/// S6: merging collapses duplicate edges, keeping the higher strength.
#[tokio::test]
async fn s6_merge_collapses_duplicate_edges() {
    let f = fixture();
    register_generous(&f, "T1").await;

    let c1 = f
        .gateway
        .create_concept("T1", NewConcept { name: "C1".into(), ..NewConcept::default() })
        .await
        .unwrap();
    let c2 = f
        .gateway
        .create_concept("T1", NewConcept { name: "C2".into(), ..NewConcept::default() })
        .await
        .unwrap();
    let c3 = f
        .gateway
        .create_concept("T1", NewConcept { name: "C3".into(), ..NewConcept::default() })
        .await
        .unwrap();

    f.gateway
        .add_relation("T1", c2.id, c3.id, RelationType::IsA, 0.6)
        .await
        .unwrap();
    f.gateway
        .add_relation("T1", c1.id, c3.id, RelationType::IsA, 0.4)
        .await
        .unwrap();

    f.gateway.merge_concepts("T1", c2.id, c1.id).await.unwrap();

    assert!(matches!(
        f.gateway.get_concept("T1", c2.id).await.unwrap_err(),
        Error::ConceptNotFound(_)
    ));

    let graph = f.gateway.get_graph("T1", c1.id, 1).await.unwrap();
    let is_a: Vec<_> = graph
        .edges
        .iter()
        .filter(|e| e.kind == RelationType::IsA)
        .collect();
    assert_eq!(is_a.len(), 1);
    assert_eq!(is_a[0].source_id, c1.id);
    assert_eq!(is_a[0].target_id, c3.id);
    assert!((is_a[0].strength - 0.6).abs() < f32::EPSILON);
}

/// S7: the 11th query inside the minute window is refused with the window
/// resource and a reset time.
#[tokio::test]
async fn s7_quota_rejects_eleventh_query_in_window() {
    let f = fixture();
    f.gateway
        .register_tenant(
            "T1",
            QuotaLimits {
                queries_per_minute: 10,
                ..QuotaLimits::professional()
            },
        )
        .await;
    f.relational
        .insert_row("products", sql_row(&[("id", json!(1))]));

    for i in 0..10 {
        // Distinct queries so the cache stays out of the picture.
        f.gateway
            .query(
                "T1",
                &format!("SELECT * FROM products WHERE id = {}", i),
                QueryOptions::default(),
            )
            .await
            .unwrap();
    }

    let before = chrono::Utc::now();
    let err = f
        .gateway
        .query("T1", "SELECT * FROM products WHERE id = 10", QueryOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::QuotaExceeded { resource, reset_at } => {
            assert_eq!(resource, "queries_per_minute");
            assert!(reset_at > before);
            assert!(reset_at <= before + chrono::Duration::seconds(61));
        }
        other => panic!("Expected QuotaExceeded, got {:?}", other),
    }

    // The refusal was logged too: 11 entries for 11 calls.
    assert_eq!(f.log.len(), 11);
}

/// S8: with the advancement workload observed, evolution advances to phase
/// 2 and the new bias shifts a hybrid-leaning query toward semantic.
#[tokio::test]
async fn s8_advancement_shifts_routing_bias() {
    let f = fixture();
    f.gateway
        .register_tenant("T1", QuotaLimits::professional())
        .await;

    let hybrid_leaning = "show me expensive laptops similar to developer picks";
    let before = f.gateway.explain_query("T1", hybrid_leaning).await.unwrap();
    assert_eq!(before.kind, QueryKind::Hybrid);

    // Feed the S8 workload straight into the tracker: 1000 queries, 210
    // semantic at 0.75 confidence, semantic p95 300 ms vs sql p95 200 ms.
    let tracker = f.gateway.tracker();
    for i in 0..1000 {
        let semantic = i < 210;
        tracker
            .record(RouteObservation {
                kind: if semantic { QueryKind::Semantic } else { QueryKind::Sql },
                confidence: if semantic { 0.75 } else { 1.0 },
                sql_latency_ms: Some(200),
                semantic_latency_ms: if semantic { Some(300) } else { None },
                merged: false,
                cached: false,
                succeeded: true,
            })
            .await;
    }

    let state = f.gateway.trigger_evolution("T1", None, false).await.unwrap();
    assert_eq!(state.phase, Phase::Two);
    assert!((state.concept_ratio - 0.3).abs() < f32::EPSILON);

    let after = f.gateway.explain_query("T1", hybrid_leaning).await.unwrap();
    assert_eq!(after.kind, QueryKind::Semantic);
}

#[tokio::test]
async fn unknown_tenant_is_refused_everywhere() {
    let f = fixture();
    let err = f
        .gateway
        .query("ghost", "SELECT 1", QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTenant(_)));

    let err = f
        .gateway
        .create_concept("ghost", NewConcept { name: "x".into(), ..NewConcept::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTenant(_)));
}

#[tokio::test]
async fn concept_capacity_is_enforced_and_freed() {
    let f = fixture();
    f.gateway
        .register_tenant(
            "T1",
            QuotaLimits {
                max_concepts: 1,
                queries_per_minute: 1000,
                api_calls_per_second: 1000,
                ..QuotaLimits::professional()
            },
        )
        .await;

    let first = f
        .gateway
        .create_concept("T1", NewConcept { name: "only".into(), ..NewConcept::default() })
        .await
        .unwrap();

    let err = f
        .gateway
        .create_concept("T1", NewConcept { name: "too many".into(), ..NewConcept::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));

    f.gateway.delete_concept("T1", first.id).await.unwrap();
    f.gateway
        .create_concept("T1", NewConcept { name: "replacement".into(), ..NewConcept::default() })
        .await
        .unwrap();
}

#[tokio::test]
async fn tenant_plan_caps_evolution_phase() {
    let f = fixture();
    f.gateway
        .register_tenant(
            "free",
            QuotaLimits {
                max_phase: 1,
                ..QuotaLimits::free()
            },
        )
        .await;

    let err = f
        .gateway
        .trigger_evolution("free", Some(Phase::Two), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn sync_surface_runs_through_the_gateway() {
    let f = fixture();
    register_generous(&f, "T1").await;
    f.relational.insert_row(
        "customers",
        sql_row(&[
            ("id", json!(1)),
            ("name", json!("Ada")),
            ("bio", json!("First programmer")),
            ("updated_at", json!(chrono::Utc::now().to_rfc3339())),
        ]),
    );

    let report = f.gateway.run_sync_now(SyncDirection::Forward).await.unwrap();
    assert_eq!(report.applied, 1);

    let status = f.gateway.sync_status().await.unwrap();
    assert!(status.last_forward_checkpoint.is_some());
    assert_eq!(status.quarantine_count, 0);

    // The extracted concept is searchable through the concept surface.
    let hits = f
        .gateway
        .search_concepts(
            "T1",
            SearchInput::Text("Ada: First programmer".to_string()),
            5,
            0.5,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].concept.name, "Ada");

    // A concept-side rename writes back to the whitelisted column.
    let ada = hits[0].concept.clone();
    f.gateway
        .update_concept(
            "T1",
            ada.id,
            ConceptPatch {
                name: Some("Ada Lovelace".to_string()),
                ..ConceptPatch::default()
            },
        )
        .await
        .unwrap();
    let report = f.gateway.run_sync_now(SyncDirection::Backward).await.unwrap();
    assert_eq!(report.applied, 1);

    let row = f
        .relational
        .fetch_row("customers", "id", &json!(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("name"), Some(&json!("Ada Lovelace")));
}

//! End-to-end router behavior over the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use janus_backends::{
    sql_row, vector_with_cosine, MemoryQueryCache, MemoryQueryLogSink, MemoryRelationalStore,
    MemoryVectorIndex, MockEmbeddingBackend,
};
use janus_concepts::{ConceptStore, MemoryConceptRepository};
use janus_core::{Error, NewConcept, Phase, QueryKind, QueryOptions, ResultItem};
use janus_evolution::{EvolutionConfig, EvolutionTracker};
use janus_router::{IntentAnalyzer, QueryRouter, RouterConfig};

const DIM: usize = 16;

struct Fixture {
    relational: Arc<MemoryRelationalStore>,
    index: Arc<MemoryVectorIndex>,
    embeddings: Arc<MockEmbeddingBackend>,
    concepts: Arc<ConceptStore>,
    log: Arc<MemoryQueryLogSink>,
    cache: Arc<MemoryQueryCache>,
    tracker: Arc<EvolutionTracker>,
    router: QueryRouter,
}

fn fixture() -> Fixture {
    let relational = Arc::new(MemoryRelationalStore::new());
    let index = Arc::new(MemoryVectorIndex::new(DIM));
    let embeddings = Arc::new(MockEmbeddingBackend::with_dimension(DIM));
    let repo = Arc::new(MemoryConceptRepository::new());
    let concepts = Arc::new(ConceptStore::new(
        repo,
        index.clone(),
        embeddings.clone(),
    ));
    let log = Arc::new(MemoryQueryLogSink::new());
    let cache = Arc::new(MemoryQueryCache::new());
    let tracker = Arc::new(EvolutionTracker::new(EvolutionConfig::default()));

    let analyzer = IntentAnalyzer::new(tracker.subscribe());
    let router = QueryRouter::new(
        analyzer,
        relational.clone(),
        concepts.clone(),
        log.clone(),
    )
    .with_cache(cache.clone())
    .with_observer(tracker.clone());

    Fixture {
        relational,
        index,
        embeddings,
        concepts,
        log,
        cache,
        tracker,
        router,
    }
}

/// S1: a structured SQL query goes to the relational engine only.
#[tokio::test]
async fn sql_query_never_touches_the_concept_store() {
    let f = fixture();
    f.relational.insert_row(
        "products",
        sql_row(&[("id", json!(1)), ("name", json!("mouse"))]),
    );

    let response = f
        .router
        .execute(
            "T1",
            "SELECT name FROM products WHERE price < 100",
            QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Sql);
    assert_eq!(response.route.confidence, 1.0);
    assert_eq!(response.items.len(), 1);

    // The concept side received zero calls.
    assert_eq!(f.index.search_call_count(), 0);
    assert_eq!(f.embeddings.embed_call_count(), 0);
}

/// S2: a semantic query goes to the concept store only.
#[tokio::test]
async fn semantic_query_never_touches_the_relational_engine() {
    let f = fixture();
    let query = "find products similar to noise-cancelling headphones";

    let query_vector = MockEmbeddingBackend::generate(query, DIM);
    f.embeddings.set_vector_for(query, query_vector.clone());

    let airpods = f
        .concepts
        .create(NewConcept {
            name: "AirPods Pro".to_string(),
            vector: Some(vector_with_cosine(&query_vector, 0.88)),
            ..NewConcept::default()
        })
        .await
        .unwrap();

    let response = f
        .router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Semantic);
    assert!(response.route.confidence >= 0.7);
    assert_eq!(response.items.len(), 1);
    match &response.items[0] {
        ResultItem::Concept(hit) => {
            assert_eq!(hit.concept.id, airpods.id);
            assert!((hit.score - 0.88).abs() < 0.01);
        }
        other => panic!("Expected a concept hit, got {:?}", other),
    }

    assert_eq!(f.relational.sql_call_count(), 0);
}

/// S3: a mixed query invokes both branches and merges.
#[tokio::test]
async fn hybrid_query_merges_both_branches() {
    let f = fixture();
    let query = "show me expensive laptops similar to developer picks";

    f.relational.set_canned_response(
        query,
        vec![
            sql_row(&[("id", json!(1)), ("name", json!("ThinkPad"))]),
            sql_row(&[("id", json!(2)), ("name", json!("MacBook"))]),
        ],
    );

    let query_vector = MockEmbeddingBackend::generate(query, DIM);
    f.embeddings.set_vector_for(query, query_vector.clone());
    f.concepts
        .create(NewConcept {
            name: "Framework 13".to_string(),
            vector: Some(vector_with_cosine(&query_vector, 0.8)),
            ..NewConcept::default()
        })
        .await
        .unwrap();

    let response = f
        .router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Hybrid);
    assert!(!response.route.degraded);
    assert_eq!(response.items.len(), 3);

    // Rows (score 1.0) rank ahead of the concept (0.8); keys are unique.
    assert!(matches!(response.items[0], ResultItem::Row(_)));
    assert!(matches!(response.items[1], ResultItem::Row(_)));
    assert!(matches!(response.items[2], ResultItem::Concept(_)));
    let mut keys: Vec<String> = response.items.iter().map(|i| i.merge_key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);
}

/// S4: the vector store blows the deadline, the relational rows still serve.
#[tokio::test]
async fn hybrid_degrades_when_semantic_branch_misses_deadline() {
    let f = fixture();
    let query = "show me expensive laptops similar to developer picks";

    f.relational.set_canned_response(
        query,
        vec![
            sql_row(&[("id", json!(1))]),
            sql_row(&[("id", json!(2))]),
            sql_row(&[("id", json!(3))]),
        ],
    );
    f.index.set_search_latency(Duration::from_millis(500));

    let response = f
        .router
        .execute(
            "T1",
            query,
            QueryOptions {
                deadline_ms: Some(150),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.route.kind, QueryKind::Hybrid);
    assert!(response.route.degraded);
    assert_eq!(response.items.len(), 3);
    assert!(response
        .route
        .partial_error
        .as_deref()
        .unwrap()
        .contains("Deadline exceeded"));
    assert!(response.route.sql_latency_ms.is_some());
    assert!(response.route.semantic_latency_ms.is_none());
}

#[tokio::test]
async fn hybrid_fails_when_good_branch_is_empty() {
    let f = fixture();
    let query = "show me expensive laptops similar to developer picks";
    // No canned rows: the relational side succeeds with zero rows, the
    // semantic side times out. Nothing worth serving remains.
    f.index.set_search_latency(Duration::from_millis(500));

    let err = f
        .router
        .execute(
            "T1",
            query,
            QueryOptions {
                deadline_ms: Some(100),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded(_)));
}

#[tokio::test]
async fn empty_query_fails_and_is_logged() {
    let f = fixture();
    let err = f
        .router
        .execute("T1", "   ", QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyQuery));

    let entries = f.log.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].error.as_deref().unwrap().contains("Empty query"));
}

/// Exactly one log entry per execute call, success or failure.
#[tokio::test]
async fn every_execute_emits_exactly_one_log_entry() {
    let f = fixture();
    f.relational
        .insert_row("products", sql_row(&[("id", json!(1))]));

    f.router
        .execute("T1", "SELECT * FROM products", QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(f.log.len(), 1);

    let _ = f.router.execute("T1", "", QueryOptions::default()).await;
    assert_eq!(f.log.len(), 2);

    // A cache hit still logs.
    f.router
        .execute("T1", "SELECT * FROM products", QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(f.log.len(), 3);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let f = fixture();
    f.relational
        .insert_row("products", sql_row(&[("id", json!(7))]));

    let first = f
        .router
        .execute("T1", "SELECT * FROM products", QueryOptions::default())
        .await
        .unwrap();
    assert!(!first.route.cached);
    assert_eq!(f.cache.len(), 1);

    let second = f
        .router
        .execute("T1", "SELECT * FROM products", QueryOptions::default())
        .await
        .unwrap();
    assert!(second.route.cached);
    assert_eq!(second.items.len(), first.items.len());

    // Only the first execution reached the relational engine.
    assert_eq!(f.relational.sql_call_count(), 1);

    // Counters incremented for both (cache hits included).
    let metrics = f.tracker.snapshot().await;
    assert_eq!(metrics.total, 2);
    assert_eq!(metrics.cache_hits, 1);
}

/// A cache hit replays the decision that produced the cached items, even
/// when the evolution bias has shifted in the meantime.
#[tokio::test]
async fn cache_hit_reports_the_original_routing_decision() {
    let f = fixture();
    let query = "show me expensive laptops similar to developer picks";
    f.relational
        .set_canned_response(query, vec![sql_row(&[("id", json!(1))])]);

    let first = f
        .router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(first.route.kind, QueryKind::Hybrid);

    // At phase 4 the analyzer would reclassify this query as semantic...
    f.tracker.trigger(Some(Phase::Four), true).await.unwrap();
    let explained = f
        .router
        .explain("T1", query, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(explained.kind, QueryKind::Semantic);

    // ...but the cache hit reports the kind that produced the payload.
    let second = f
        .router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();
    assert!(second.route.cached);
    assert_eq!(second.route.kind, QueryKind::Hybrid);
    assert_eq!(second.route.confidence, first.route.confidence);
}

/// The LLM tier is never consulted for a cache hit.
#[tokio::test]
async fn cache_hit_skips_intent_analysis() {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl janus_core::IntentProvider for CountingLlm {
        async fn classify(&self, _text: &str) -> janus_core::Result<janus_core::IntentDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::LlmUnavailable("unavailable".to_string()))
        }
    }

    let relational = Arc::new(MemoryRelationalStore::new());
    let index = Arc::new(MemoryVectorIndex::new(DIM));
    let embeddings = Arc::new(MockEmbeddingBackend::with_dimension(DIM));
    let concepts = Arc::new(ConceptStore::new(
        Arc::new(MemoryConceptRepository::new()),
        index,
        embeddings,
    ));
    let tracker = Arc::new(EvolutionTracker::new(EvolutionConfig::default()));
    let llm = Arc::new(CountingLlm {
        calls: AtomicUsize::new(0),
    });

    let analyzer = IntentAnalyzer::new(tracker.subscribe()).with_llm(llm.clone());
    let router = QueryRouter::new(
        analyzer,
        relational,
        concepts,
        Arc::new(MemoryQueryLogSink::new()),
    )
    .with_cache(Arc::new(MemoryQueryCache::new()));

    let query = "find books similar to dune";
    router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    // The repeat is served from cache without touching the LLM tier.
    let cached = router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();
    assert!(cached.route.cached);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

/// Pure semantic queries run under the tighter semantic deadline.
#[tokio::test]
async fn semantic_query_uses_the_semantic_deadline() {
    let f = fixture();
    let query = "find products similar to noise-cancelling headphones";
    f.embeddings
        .set_vector_for(query, MockEmbeddingBackend::generate(query, DIM));
    f.index.set_search_latency(Duration::from_millis(300));

    let relational = Arc::new(MemoryRelationalStore::new());
    let tracker = Arc::new(EvolutionTracker::new(EvolutionConfig::default()));
    let router = QueryRouter::new(
        IntentAnalyzer::new(tracker.subscribe()),
        relational,
        f.concepts.clone(),
        Arc::new(MemoryQueryLogSink::new()),
    )
    .with_config(RouterConfig {
        semantic_deadline: Duration::from_millis(100),
        ..RouterConfig::default()
    });

    let err = router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded(_)));

    // An explicit per-request deadline overrides the semantic default.
    router
        .execute(
            "T1",
            query,
            QueryOptions {
                deadline_ms: Some(2_000),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
}

/// When both hybrid branches fail, the surfaced error keeps its own
/// variant and carries the sibling as context.
#[tokio::test]
async fn hybrid_double_failure_keeps_the_first_error_variant() {
    let f = fixture();
    let query = "show me expensive laptops similar to developer picks";
    f.relational.set_execute_latency(Duration::from_millis(400));
    f.index.set_search_latency(Duration::from_millis(400));

    let err = f
        .router
        .execute(
            "T1",
            query,
            QueryOptions {
                deadline_ms: Some(120),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        Error::DeadlineExceeded(msg) => {
            assert!(msg.contains("also_failed"), "missing context: {}", msg);
        }
        other => panic!("Expected DeadlineExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn explain_classifies_without_executing() {
    let f = fixture();
    f.relational
        .insert_row("products", sql_row(&[("id", json!(1))]));

    let route = f
        .router
        .explain("T1", "SELECT * FROM products", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(route.kind, QueryKind::Sql);
    assert_eq!(f.relational.sql_call_count(), 0);
    assert!(f.log.is_empty());
}

#[tokio::test]
async fn observations_feed_the_tracker() {
    let f = fixture();
    f.relational
        .insert_row("products", sql_row(&[("id", json!(1))]));

    f.router
        .execute("T1", "SELECT * FROM products", QueryOptions::default())
        .await
        .unwrap();

    let query = "find products similar to noise-cancelling headphones";
    f.embeddings
        .set_vector_for(query, MockEmbeddingBackend::generate(query, DIM));
    f.router
        .execute("T1", query, QueryOptions::default())
        .await
        .unwrap();

    let metrics = f.tracker.snapshot().await;
    assert_eq!(metrics.total, 2);
    assert_eq!(metrics.sql_queries, 1);
    assert_eq!(metrics.semantic_queries, 1);
}

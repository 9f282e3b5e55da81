//! The query router: admission, cache, intent, dispatch, merge, logging.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use janus_concepts::{ConceptStore, SearchInput};
use janus_core::{
    defaults, query_fingerprint, AdmissionControl, Error, IntentDecision, QueryCache, QueryKind,
    QueryLogEntry, QueryLogSink, QueryOptions, QueryResponse, QuotaResource, RelationalStore,
    Result, ResultItem, RouteInfo, RouteObservation, RouteObserver,
};

use crate::intent::IntentAnalyzer;
use crate::merge::merge_hybrid;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Default end-to-end deadline for `execute`.
    pub deadline: Duration,
    /// Default deadline for a pure semantic query.
    pub semantic_deadline: Duration,
    /// TTL for cached results.
    pub cache_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(defaults::QUERY_DEADLINE_MS),
            semantic_deadline: Duration::from_millis(defaults::SEMANTIC_SEARCH_DEADLINE_MS),
            cache_ttl: Duration::from_secs(defaults::CACHE_TTL_SECS),
        }
    }
}

/// Cached payload for one fingerprint. The routing decision that produced
/// the items is stored alongside them, so a cache hit reports the kind and
/// confidence actually used rather than reclassifying under whatever
/// evolution bias holds at hit time.
#[derive(Serialize, Deserialize)]
struct CachedQuery {
    kind: QueryKind,
    confidence: f32,
    items: Vec<ResultItem>,
}

/// Routes queries between the relational engine and the concept store,
/// merging results for hybrid queries.
pub struct QueryRouter {
    analyzer: IntentAnalyzer,
    relational: Arc<dyn RelationalStore>,
    concepts: Arc<ConceptStore>,
    log: Arc<dyn QueryLogSink>,
    admission: Option<Arc<dyn AdmissionControl>>,
    cache: Option<Arc<dyn QueryCache>>,
    observer: Option<Arc<dyn RouteObserver>>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(
        analyzer: IntentAnalyzer,
        relational: Arc<dyn RelationalStore>,
        concepts: Arc<ConceptStore>,
        log: Arc<dyn QueryLogSink>,
    ) -> Self {
        Self {
            analyzer,
            relational,
            concepts,
            log,
            admission: None,
            cache: None,
            observer: None,
            config: RouterConfig::default(),
        }
    }

    /// Attach the quota gate.
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Attach the query cache.
    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach the evolution tracker.
    pub fn with_observer(mut self, observer: Arc<dyn RouteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Classify a query without executing it.
    pub async fn explain(&self, _tenant: &str, query: &str, opts: &QueryOptions) -> Result<RouteInfo> {
        let start = Instant::now();
        let decision = self.analyzer.analyze(query, opts).await?;
        Ok(RouteInfo {
            kind: decision.kind,
            confidence: decision.confidence,
            cached: false,
            degraded: false,
            partial_error: None,
            sql_latency_ms: None,
            semantic_latency_ms: None,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Execute a query for a tenant.
    ///
    /// Exactly one query log entry is emitted per call, before the reply,
    /// for every outcome including errors. The evolution tracker observes
    /// the success path (cache hits included).
    #[instrument(skip(self, opts), fields(subsystem = "router", component = "execute", tenant = %tenant, query = %query))]
    pub async fn execute(
        &self,
        tenant: &str,
        query: &str,
        opts: QueryOptions,
    ) -> Result<QueryResponse> {
        let start = Instant::now();

        if let Some(admission) = &self.admission {
            if let Err(e) = admission.admit(tenant, QuotaResource::Queries).await {
                self.append_log(tenant, query, None, 0, Some(&e)).await;
                return Err(e);
            }
        }

        // Cache lookup comes before intent analysis: a hit needs no
        // classification (the stored decision is replayed) and must not pay
        // the LLM tier's latency.
        let fingerprint = query_fingerprint(tenant, query, &opts);
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(&fingerprint).await {
                if let Ok(cached) = serde_json::from_slice::<CachedQuery>(&bytes) {
                    let route = RouteInfo {
                        kind: cached.kind,
                        confidence: cached.confidence,
                        cached: true,
                        degraded: false,
                        partial_error: None,
                        sql_latency_ms: None,
                        semantic_latency_ms: None,
                        latency_ms: start.elapsed().as_millis() as u64,
                    };
                    let response = QueryResponse {
                        items: cached.items,
                        route,
                    };
                    self.append_log(tenant, query, Some(&response.route), response.items.len(), None)
                        .await;
                    self.observe_success(&response.route).await;
                    debug!(fingerprint = %fingerprint, "Served from cache");
                    return Ok(response);
                }
            }
        }

        let decision = match self.analyzer.analyze(query, &opts).await {
            Ok(decision) => decision,
            Err(e) => {
                self.append_log(tenant, query, None, 0, Some(&e)).await;
                return Err(e);
            }
        };

        let deadline = opts
            .deadline_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.deadline);

        let outcome = self.dispatch(&decision, query, &opts, deadline, start).await;

        match outcome {
            Ok(response) => {
                self.append_log(tenant, query, Some(&response.route), response.items.len(), None)
                    .await;
                self.observe_success(&response.route).await;

                if let Some(cache) = &self.cache {
                    let cached = CachedQuery {
                        kind: response.route.kind,
                        confidence: response.route.confidence,
                        items: response.items.clone(),
                    };
                    if let Ok(bytes) = serde_json::to_vec(&cached) {
                        cache.put(&fingerprint, &bytes, self.config.cache_ttl).await;
                    }
                }

                info!(
                    kind = %response.route.kind,
                    confidence = response.route.confidence,
                    degraded = response.route.degraded,
                    result_count = response.items.len(),
                    duration_ms = response.route.latency_ms,
                    "Query complete"
                );
                Ok(response)
            }
            Err(e) => {
                let route = RouteInfo {
                    kind: decision.kind,
                    confidence: decision.confidence,
                    cached: false,
                    degraded: false,
                    partial_error: None,
                    sql_latency_ms: None,
                    semantic_latency_ms: None,
                    latency_ms: start.elapsed().as_millis() as u64,
                };
                self.append_log(tenant, query, Some(&route), 0, Some(&e)).await;
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        decision: &IntentDecision,
        query: &str,
        opts: &QueryOptions,
        deadline: Duration,
        start: Instant,
    ) -> Result<QueryResponse> {
        match decision.kind {
            QueryKind::Sql => {
                let (rows, sql_ms) =
                    with_deadline(deadline, "sql", self.sql_branch(query)).await?;
                Ok(QueryResponse {
                    items: rows.into_iter().map(ResultItem::Row).collect(),
                    route: RouteInfo {
                        kind: QueryKind::Sql,
                        confidence: decision.confidence,
                        cached: false,
                        degraded: false,
                        partial_error: None,
                        sql_latency_ms: Some(sql_ms),
                        semantic_latency_ms: None,
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                })
            }
            QueryKind::Semantic => {
                // Pure semantic queries get the tighter semantic deadline
                // unless the caller set an explicit one.
                let semantic_deadline = opts
                    .deadline_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.semantic_deadline);
                let (concepts, semantic_ms) =
                    with_deadline(semantic_deadline, "semantic", self.semantic_branch(query, opts))
                        .await?;
                Ok(QueryResponse {
                    items: concepts.into_iter().map(ResultItem::Concept).collect(),
                    route: RouteInfo {
                        kind: QueryKind::Semantic,
                        confidence: decision.confidence,
                        cached: false,
                        degraded: false,
                        partial_error: None,
                        sql_latency_ms: None,
                        semantic_latency_ms: Some(semantic_ms),
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                })
            }
            QueryKind::Hybrid => {
                // Both branches run concurrently under one shared deadline;
                // the first failure does not cancel the sibling. Each branch
                // records its own completion time so a double failure can
                // report the error that actually arrived first.
                let sql_task = async {
                    let started = Instant::now();
                    let outcome = with_deadline(deadline, "sql", self.sql_branch(query)).await;
                    (outcome, started.elapsed())
                };
                let semantic_task = async {
                    let started = Instant::now();
                    let outcome =
                        with_deadline(deadline, "semantic", self.semantic_branch(query, opts))
                            .await;
                    (outcome, started.elapsed())
                };
                let ((sql_outcome, sql_elapsed), (semantic_outcome, semantic_elapsed)) =
                    tokio::join!(sql_task, semantic_task);
                self.merge_outcomes(
                    decision,
                    sql_outcome,
                    semantic_outcome,
                    sql_elapsed,
                    semantic_elapsed,
                    start,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_outcomes(
        &self,
        decision: &IntentDecision,
        sql_outcome: Result<(Vec<janus_core::SqlRow>, u64)>,
        semantic_outcome: Result<(Vec<janus_core::ScoredConcept>, u64)>,
        sql_elapsed: Duration,
        semantic_elapsed: Duration,
        start: Instant,
    ) -> Result<QueryResponse> {
        match (sql_outcome, semantic_outcome) {
            (Ok((rows, sql_ms)), Ok((concepts, semantic_ms))) => {
                let items = merge_hybrid(rows, concepts);
                Ok(QueryResponse {
                    items,
                    route: RouteInfo {
                        kind: QueryKind::Hybrid,
                        confidence: decision.confidence,
                        cached: false,
                        degraded: false,
                        partial_error: None,
                        sql_latency_ms: Some(sql_ms),
                        semantic_latency_ms: Some(semantic_ms),
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                })
            }
            (Ok((rows, sql_ms)), Err(semantic_err)) if !rows.is_empty() => {
                warn!(error = %semantic_err, "Semantic branch failed, serving relational side");
                Ok(QueryResponse {
                    items: rows.into_iter().map(ResultItem::Row).collect(),
                    route: RouteInfo {
                        kind: QueryKind::Hybrid,
                        confidence: decision.confidence,
                        cached: false,
                        degraded: true,
                        partial_error: Some(semantic_err.to_string()),
                        sql_latency_ms: Some(sql_ms),
                        semantic_latency_ms: None,
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                })
            }
            (Err(sql_err), Ok((concepts, semantic_ms))) if !concepts.is_empty() => {
                warn!(error = %sql_err, "Relational branch failed, serving semantic side");
                Ok(QueryResponse {
                    items: concepts.into_iter().map(ResultItem::Concept).collect(),
                    route: RouteInfo {
                        kind: QueryKind::Hybrid,
                        confidence: decision.confidence,
                        cached: false,
                        degraded: true,
                        partial_error: Some(sql_err.to_string()),
                        sql_latency_ms: None,
                        semantic_latency_ms: Some(semantic_ms),
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                })
            }
            (Ok(_), Err(semantic_err)) => Err(semantic_err),
            (Err(sql_err), Ok(_)) => Err(sql_err),
            (Err(sql_err), Err(semantic_err)) => {
                // Branches start together, so per-branch elapsed time tells
                // which error actually arrived first.
                let (first, also_failed) = if sql_elapsed <= semantic_elapsed {
                    (sql_err, semantic_err)
                } else {
                    (semantic_err, sql_err)
                };
                Err(attach_also_failed(first, &also_failed))
            }
        }
    }

    async fn sql_branch(&self, query: &str) -> Result<(Vec<janus_core::SqlRow>, u64)> {
        let start = Instant::now();
        let rows = self.relational.execute(query, &[]).await?;
        Ok((rows, start.elapsed().as_millis() as u64))
    }

    async fn semantic_branch(
        &self,
        query: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<janus_core::ScoredConcept>, u64)> {
        let start = Instant::now();
        let hits = self
            .concepts
            .semantic_search(SearchInput::Text(query.to_string()), opts.k, opts.threshold)
            .await?;
        Ok((hits, start.elapsed().as_millis() as u64))
    }

    async fn append_log(
        &self,
        tenant: &str,
        query: &str,
        route: Option<&RouteInfo>,
        result_count: usize,
        error: Option<&Error>,
    ) {
        let entry = QueryLogEntry {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            query: query.to_string(),
            kind: route.map(|r| r.kind),
            confidence: route.map(|r| r.confidence).unwrap_or(0.0),
            sql_latency_ms: route.and_then(|r| r.sql_latency_ms),
            semantic_latency_ms: route.and_then(|r| r.semantic_latency_ms),
            result_count: result_count as i64,
            error: error.map(|e| e.to_string()),
            created_at: Utc::now(),
        };
        if let Err(e) = self.log.append(&entry).await {
            warn!(error = %e, "Query log append failed");
        }
    }

    async fn observe_success(&self, route: &RouteInfo) {
        if let Some(observer) = &self.observer {
            observer
                .observe(RouteObservation {
                    kind: route.kind,
                    confidence: route.confidence,
                    sql_latency_ms: route.sql_latency_ms,
                    semantic_latency_ms: route.semantic_latency_ms,
                    merged: route.kind == QueryKind::Hybrid && !route.degraded && !route.cached,
                    cached: route.cached,
                    succeeded: true,
                })
                .await;
        }
    }
}

/// Run a branch under a deadline, converting expiry to `DeadlineExceeded`.
async fn with_deadline<T>(
    deadline: Duration,
    label: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded(format!("{} branch", label))),
    }
}

/// Append the sibling branch's error as context while keeping the first
/// error's own variant intact.
fn attach_also_failed(first: Error, also_failed: &Error) -> Error {
    let context = format!(" (also_failed: {})", also_failed);
    match first {
        Error::DeadlineExceeded(msg) => Error::DeadlineExceeded(format!("{}{}", msg, context)),
        Error::UpstreamUnavailable(msg) => {
            Error::UpstreamUnavailable(format!("{}{}", msg, context))
        }
        Error::RelationalBackend(msg) => Error::RelationalBackend(format!("{}{}", msg, context)),
        Error::VectorBackend(msg) => Error::VectorBackend(format!("{}{}", msg, context)),
        Error::MetadataBackend(msg) => Error::MetadataBackend(format!("{}{}", msg, context)),
        Error::Embedding(msg) => Error::Embedding(format!("{}{}", msg, context)),
        Error::Internal(msg) => Error::Internal(format!("{}{}", msg, context)),
        other => {
            warn!(also_failed = %also_failed, "Second hybrid branch also failed");
            other
        }
    }
}

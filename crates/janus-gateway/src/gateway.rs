//! The gateway facade: one transport-agnostic surface over the router,
//! concept store, evolution tracker, synchronizer, and quota gate.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use janus_backends::{MemoryCheckpointStore, MemoryQueryLogSink};
use janus_concepts::{ConceptStore, SearchInput, Subgraph};
use janus_core::{
    AdmissionControl, CheckpointStore, Concept, ConceptPatch, ConceptRepository, EmbeddingBackend,
    Error, EvolutionState, IntentProvider, NewConcept, Phase, QueryCache, QueryLogSink,
    QueryOptions, QueryResponse, QuotaLimits, QuotaResource, Relation, RelationType,
    RelationalStore, Result, RouteInfo, ScoredConcept, SyncDirection, SyncStatus, VectorIndex,
};
use janus_evolution::{EvolutionConfig, EvolutionMetrics, EvolutionTracker};
use janus_router::{IntentAnalyzer, QueryRouter, RouterConfig};
use janus_sync::{MappingRule, SyncReport, Synchronizer};

use crate::quota::QuotaGate;

/// The evolutionary hybrid database gateway.
pub struct Gateway {
    router: QueryRouter,
    concepts: Arc<ConceptStore>,
    quota: Arc<QuotaGate>,
    tracker: Arc<EvolutionTracker>,
    synchronizer: Arc<Synchronizer>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Register a tenant with explicit limits.
    pub async fn register_tenant(&self, tenant: &str, limits: QuotaLimits) {
        self.quota.register(tenant, limits).await;
    }

    /// One-time startup work: create the vector collection if missing.
    pub async fn bootstrap(&self) -> Result<()> {
        self.concepts
            .ensure_collection(janus_core::defaults::VECTOR_COLLECTION)
            .await
    }

    // ── Query path ─────────────────────────────────────────────────────────

    /// Execute a query, routing it to the right engine(s).
    pub async fn query(
        &self,
        tenant: &str,
        text: &str,
        opts: QueryOptions,
    ) -> Result<QueryResponse> {
        self.router.execute(tenant, text, opts).await
    }

    /// Classify a query without executing it.
    pub async fn explain_query(&self, tenant: &str, text: &str) -> Result<RouteInfo> {
        self.router
            .explain(tenant, text, &QueryOptions::default())
            .await
    }

    // ── Concept path ───────────────────────────────────────────────────────

    pub async fn create_concept(&self, tenant: &str, new: NewConcept) -> Result<Concept> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.quota
            .check_capacity(tenant, QuotaResource::Concepts, 1)
            .await?;
        let concept = self.concepts.create(new).await?;
        self.quota
            .record_capacity(tenant, QuotaResource::Concepts, 1)
            .await?;
        Ok(concept)
    }

    pub async fn get_concept(&self, tenant: &str, id: Uuid) -> Result<Concept> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.get(id).await
    }

    pub async fn update_concept(
        &self,
        tenant: &str,
        id: Uuid,
        patch: ConceptPatch,
    ) -> Result<Concept> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.update(id, patch).await
    }

    pub async fn delete_concept(&self, tenant: &str, id: Uuid) -> Result<()> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.delete(id).await?;
        self.quota
            .record_capacity(tenant, QuotaResource::Concepts, -1)
            .await?;
        Ok(())
    }

    pub async fn search_concepts(
        &self,
        tenant: &str,
        input: SearchInput,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredConcept>> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.semantic_search(input, k, threshold).await
    }

    pub async fn add_relation(
        &self,
        tenant: &str,
        source: Uuid,
        target: Uuid,
        kind: RelationType,
        strength: f32,
    ) -> Result<Relation> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts
            .add_relation(source, target, kind, strength)
            .await
    }

    pub async fn remove_relation(
        &self,
        tenant: &str,
        source: Uuid,
        target: Uuid,
        kind: RelationType,
    ) -> Result<()> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.remove_relation(source, target, kind).await
    }

    pub async fn get_graph(&self, tenant: &str, root: Uuid, depth: usize) -> Result<Subgraph> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        self.concepts.neighbors(root, depth).await
    }

    pub async fn merge_concepts(
        &self,
        tenant: &str,
        loser: Uuid,
        winner: Uuid,
    ) -> Result<Concept> {
        self.quota.admit(tenant, QuotaResource::ApiCalls).await?;
        let merged = self.concepts.merge(loser, winner).await?;
        self.quota
            .record_capacity(tenant, QuotaResource::Concepts, -1)
            .await?;
        Ok(merged)
    }

    // ── Evolution ──────────────────────────────────────────────────────────

    pub async fn get_evolution(&self) -> EvolutionMetrics {
        self.tracker.snapshot().await
    }

    /// Manually trigger evolution. Without `force` the evaluator's
    /// preconditions must hold; the tenant's plan caps the reachable phase
    /// either way.
    pub async fn trigger_evolution(
        &self,
        tenant: &str,
        target: Option<Phase>,
        force: bool,
    ) -> Result<EvolutionState> {
        let limits = self.quota.limits(tenant).await?;
        let current = self.tracker.snapshot().await.phase;
        let effective = match target {
            Some(phase) => phase,
            None => current
                .next()
                .ok_or_else(|| Error::InvalidInput("Already at maximum phase".to_string()))?,
        };
        if effective.number() > limits.max_phase {
            return Err(Error::InvalidInput(format!(
                "Tenant plan caps evolution at phase {}",
                limits.max_phase
            )));
        }

        let state = self.tracker.trigger(Some(effective), force).await?;
        info!(
            tenant,
            phase = state.phase.number(),
            forced = force,
            "Evolution triggered through the gateway"
        );
        Ok(state)
    }

    // ── Sync ───────────────────────────────────────────────────────────────

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        self.synchronizer.status().await
    }

    pub async fn run_sync_now(&self, direction: SyncDirection) -> Result<SyncReport> {
        self.synchronizer.run(direction).await
    }

    /// The synchronizer, for wiring a background worker.
    pub fn synchronizer(&self) -> Arc<Synchronizer> {
        self.synchronizer.clone()
    }

    /// The evolution tracker, for wiring subscribers.
    pub fn tracker(&self) -> Arc<EvolutionTracker> {
        self.tracker.clone()
    }
}

/// Wires a [`Gateway`] from its backends.
#[derive(Default)]
pub struct GatewayBuilder {
    relational: Option<Arc<dyn RelationalStore>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
    concept_repo: Option<Arc<dyn ConceptRepository>>,
    log: Option<Arc<dyn QueryLogSink>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cache: Option<Arc<dyn QueryCache>>,
    llm: Option<Arc<dyn IntentProvider>>,
    tracker: Option<Arc<EvolutionTracker>>,
    rules: Vec<MappingRule>,
    router_config: Option<RouterConfig>,
}

impl GatewayBuilder {
    pub fn relational(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.relational = Some(store);
        self
    }

    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn embeddings(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embeddings = Some(backend);
        self
    }

    pub fn concept_repository(mut self, repo: Arc<dyn ConceptRepository>) -> Self {
        self.concept_repo = Some(repo);
        self
    }

    pub fn query_log(mut self, log: Arc<dyn QueryLogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn llm_intent(mut self, provider: Arc<dyn IntentProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn tracker(mut self, tracker: Arc<EvolutionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn mapping_rule(mut self, rule: MappingRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = Some(config);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let relational = self
            .relational
            .ok_or_else(|| Error::InvalidInput("Relational store is required".to_string()))?;
        let vector_index = self
            .vector_index
            .ok_or_else(|| Error::InvalidInput("Vector index is required".to_string()))?;
        let embeddings = self
            .embeddings
            .ok_or_else(|| Error::InvalidInput("Embedding backend is required".to_string()))?;
        let concept_repo = self
            .concept_repo
            .ok_or_else(|| Error::InvalidInput("Concept repository is required".to_string()))?;

        let log = self
            .log
            .unwrap_or_else(|| Arc::new(MemoryQueryLogSink::new()));
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));
        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(EvolutionTracker::new(EvolutionConfig::default())));

        let concepts = Arc::new(ConceptStore::new(
            concept_repo,
            vector_index,
            embeddings,
        ));

        let mut analyzer = IntentAnalyzer::new(tracker.subscribe());
        if let Some(llm) = self.llm {
            analyzer = analyzer.with_llm(llm);
        }

        let quota = Arc::new(QuotaGate::new());
        let mut router = QueryRouter::new(
            analyzer,
            relational.clone(),
            concepts.clone(),
            log,
        )
        .with_admission(quota.clone())
        .with_observer(tracker.clone());
        if let Some(cache) = self.cache {
            router = router.with_cache(cache);
        }
        if let Some(config) = self.router_config {
            router = router.with_config(config);
        }

        let synchronizer = Arc::new(Synchronizer::new(
            relational,
            concepts.clone(),
            checkpoints,
            self.rules,
        ));

        Ok(Gateway {
            router,
            concepts,
            quota,
            tracker,
            synchronizer,
        })
    }
}

//! Core data models shared across the janus crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

// =============================================================================
// CONCEPTS
// =============================================================================

/// A semantic unit: named, embedded, related to other concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: Uuid,
    /// Short display string, non-empty, at most 512 bytes.
    pub name: String,
    /// Free text, may be empty, at most 64 KiB.
    #[serde(default)]
    pub description: String,
    /// Fixed-dimension embedding. Must be present and finite for the concept
    /// to be searchable; omitted when only metadata was loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Open key→value mapping. Reserved keys: `source_key`, `row_hash`,
    /// `mapping_rule` (used by the synchronizer).
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
    /// Monotonically non-decreasing usage counter.
    #[serde(default)]
    pub usage_count: i64,
    /// Recomputed from usage and relations; always in [0, 1].
    #[serde(default)]
    pub strength: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// Metadata key tying a concept back to a relational row.
    pub const SOURCE_KEY: &'static str = "source_key";
    /// Metadata key recording the hash of the originating row.
    pub const ROW_HASH: &'static str = "row_hash";
    /// Metadata key naming the mapping rule used for backward writes.
    pub const MAPPING_RULE: &'static str = "mapping_rule";

    /// Source key stored by the synchronizer, if any.
    pub fn source_key(&self) -> Option<&str> {
        self.metadata.get(Self::SOURCE_KEY).and_then(|v| v.as_str())
    }

    /// Row hash stored by the synchronizer, if any.
    pub fn row_hash(&self) -> Option<&str> {
        self.metadata.get(Self::ROW_HASH).and_then(|v| v.as_str())
    }

    /// Text fed to the embedding backend for this concept.
    pub fn embedding_text(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.description)
        }
    }
}

/// Request to create a new concept.
#[derive(Debug, Clone, Default)]
pub struct NewConcept {
    /// Generated when absent.
    pub id: Option<Uuid>,
    pub name: String,
    pub description: String,
    /// Computed via the embedding backend when not supplied.
    pub vector: Option<Vec<f32>>,
    pub metadata: JsonMap<String, JsonValue>,
}

/// Partial update for a concept. Patching `name` or `description` triggers
/// re-embedding; patching `metadata` does not.
#[derive(Debug, Clone, Default)]
pub struct ConceptPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Keys merged into the existing metadata map.
    pub metadata: Option<JsonMap<String, JsonValue>>,
}

impl ConceptPatch {
    /// Whether applying this patch requires a new embedding.
    pub fn triggers_reembedding(&self) -> bool {
        self.name.is_some() || self.description.is_some()
    }
}

/// Directed typed edge between two concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    IsA,
    PartOf,
    RelatedTo,
    OppositeOf,
}

impl RelationType {
    /// All relation types in their stable sort order.
    pub const ALL: [RelationType; 4] = [
        RelationType::IsA,
        RelationType::PartOf,
        RelationType::RelatedTo,
        RelationType::OppositeOf,
    ];
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IsA => write!(f, "is_a"),
            Self::PartOf => write!(f, "part_of"),
            Self::RelatedTo => write!(f, "related_to"),
            Self::OppositeOf => write!(f, "opposite_of"),
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "is_a" => Ok(Self::IsA),
            "part_of" => Ok(Self::PartOf),
            "related_to" => Ok(Self::RelatedTo),
            "opposite_of" => Ok(Self::OppositeOf),
            _ => Err(format!("Invalid relation type: {}", s)),
        }
    }
}

/// A directed edge. At most one edge of a given kind exists per ordered
/// `(source, target)` pair; upserts keep the higher strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: RelationType,
    /// Strength in (0, 1].
    pub strength: f32,
    pub created_at: DateTime<Utc>,
}

/// A concept paired with its similarity score from a semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredConcept {
    pub concept: Concept,
    /// Cosine similarity in [0, 1].
    pub score: f32,
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Distance metric for a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Euclid,
    Dot,
}

/// A raw hit from the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    #[serde(default)]
    pub payload: JsonValue,
}

// =============================================================================
// RELATIONAL ROWS AND MERGED RESULTS
// =============================================================================

/// A relational row surfaced to the router: an opaque map keyed by column.
///
/// `serde_json::Map` keeps keys sorted, so serialization (and therefore row
/// hashing) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlRow {
    pub columns: JsonMap<String, JsonValue>,
}

impl SqlRow {
    pub fn new(columns: JsonMap<String, JsonValue>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns.get(column)
    }

    /// Primary key as a string, when an `id` column is present.
    pub fn primary_key(&self) -> Option<String> {
        self.columns.get("id").map(json_value_key)
    }

    /// `updated_at` column parsed as a UTC timestamp, if present.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.columns.get("updated_at")? {
            JsonValue::String(s) => s.parse::<DateTime<Utc>>().ok(),
            _ => None,
        }
    }
}

/// Render a JSON scalar as a stable key fragment.
fn json_value_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One entry of a (possibly merged) query result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultItem {
    Row(SqlRow),
    Concept(ScoredConcept),
}

impl ResultItem {
    /// Stable deduplication key: relational rows by primary key when
    /// available (falling back to the full row), concepts by id.
    pub fn merge_key(&self) -> String {
        match self {
            ResultItem::Row(row) => match row.primary_key() {
                Some(pk) => format!("row:{}", pk),
                None => format!(
                    "row:{}",
                    serde_json::to_string(&row.columns).unwrap_or_default()
                ),
            },
            ResultItem::Concept(sc) => format!("concept:{}", sc.concept.id),
        }
    }

    /// Normalized merge score: SQL rows score 1.0, concepts keep their
    /// similarity in [0, 1].
    pub fn score(&self) -> f32 {
        match self {
            ResultItem::Row(_) => 1.0,
            ResultItem::Concept(sc) => sc.score,
        }
    }
}

// =============================================================================
// ROUTING
// =============================================================================

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Sql,
    Semantic,
    Hybrid,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Semantic => write!(f, "semantic"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Outcome of intent analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDecision {
    pub kind: QueryKind,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub reasoning: String,
}

/// Per-query options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum semantic results.
    pub k: usize,
    /// Minimum cosine similarity for semantic results.
    pub threshold: f32,
    /// Caller hint for the preferred layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<QueryKind>,
    /// Request deadline in milliseconds. The router default applies when
    /// absent. Excluded from the cache fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: crate::defaults::SEMANTIC_K,
            threshold: crate::defaults::SEMANTIC_THRESHOLD,
            preferred: None,
            deadline_ms: None,
        }
    }
}

/// The router's per-call decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub kind: QueryKind,
    pub confidence: f32,
    /// Result served from the query cache.
    #[serde(default)]
    pub cached: bool,
    /// One hybrid branch failed but the other produced rows.
    #[serde(default)]
    pub degraded: bool,
    /// Error of the failed branch when `degraded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_error: Option<String>,
    /// Relational branch latency, when that branch ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_latency_ms: Option<u64>,
    /// Semantic branch latency, when that branch ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_latency_ms: Option<u64>,
    /// End-to-end latency.
    pub latency_ms: u64,
}

/// A query result set with its routing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub items: Vec<ResultItem>,
    pub route: RouteInfo,
}

/// Per-query log record. Exactly one entry is emitted per `execute` call,
/// before the reply is returned, for every outcome including errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: Uuid,
    pub tenant: String,
    pub query: String,
    pub kind: Option<QueryKind>,
    pub confidence: f32,
    pub sql_latency_ms: Option<u64>,
    pub semantic_latency_ms: Option<u64>,
    pub result_count: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One routing outcome fed to the evolution tracker.
#[derive(Debug, Clone, Copy)]
pub struct RouteObservation {
    pub kind: QueryKind,
    pub confidence: f32,
    pub sql_latency_ms: Option<u64>,
    pub semantic_latency_ms: Option<u64>,
    /// Hybrid query whose branches were actually merged.
    pub merged: bool,
    pub cached: bool,
    pub succeeded: bool,
}

// =============================================================================
// EVOLUTION
// =============================================================================

/// Evolution phase. Controls the routing bias toward the semantic path.
/// Phases only advance; regression requires explicit operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    One,
    Two,
    Three,
    Four,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            _ => None,
        }
    }

    /// Target fraction of queries the phase intends to land on the concept
    /// path: 10% / 30% / 70% / 100%.
    pub fn concept_ratio(&self) -> f32 {
        match self {
            Self::One => 0.1,
            Self::Two => 0.3,
            Self::Three => 0.7,
            Self::Four => 1.0,
        }
    }

    pub fn next(&self) -> Option<Phase> {
        Self::from_number(self.number() + 1)
    }

    /// Observed concept share required to advance INTO this phase.
    pub fn advancement_target(&self) -> Option<f32> {
        match self {
            Self::One => None,
            Self::Two => Some(0.20),
            Self::Three => Some(0.50),
            Self::Four => Some(0.80),
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;
    fn try_from(n: u8) -> std::result::Result<Self, String> {
        Phase::from_number(n).ok_or_else(|| format!("Invalid phase: {}", n))
    }
}

impl From<Phase> for u8 {
    fn from(p: Phase) -> u8 {
        p.number()
    }
}

/// Cumulative routing counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EvolutionCounters {
    pub total: u64,
    pub sql_queries: u64,
    pub semantic_queries: u64,
    pub hybrid_queries: u64,
    pub merge_hits: u64,
    pub cache_hits: u64,
}

/// The process-wide evolution singleton. Created at first boot, never
/// destroyed; persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionState {
    pub phase: Phase,
    pub concept_ratio: f32,
    pub counters: EvolutionCounters,
    pub updated_at: DateTime<Utc>,
}

impl Default for EvolutionState {
    fn default() -> Self {
        Self {
            phase: Phase::One,
            concept_ratio: Phase::One.concept_ratio(),
            counters: EvolutionCounters::default(),
            updated_at: Utc::now(),
        }
    }
}

/// The value published to intent analyzers through the watch channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolutionSignal {
    pub phase: Phase,
    pub concept_ratio: f32,
}

impl Default for EvolutionSignal {
    fn default() -> Self {
        Self {
            phase: Phase::One,
            concept_ratio: Phase::One.concept_ratio(),
        }
    }
}

// =============================================================================
// QUOTA
// =============================================================================

/// Rate-limited or capacity-bounded resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Queries,
    ApiCalls,
    Concepts,
    Storage,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queries => write!(f, "queries"),
            Self::ApiCalls => write!(f, "api_calls"),
            Self::Concepts => write!(f, "concepts"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Per-tenant limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_concepts: i64,
    pub max_queries_per_month: i64,
    pub max_api_calls_per_month: i64,
    pub max_storage_bytes: i64,
    pub queries_per_minute: u32,
    pub api_calls_per_second: u32,
    /// Highest evolution phase this tenant may trigger.
    pub max_phase: u8,
}

impl QuotaLimits {
    /// Free tier defaults.
    pub fn free() -> Self {
        Self {
            max_concepts: 100_000,
            max_queries_per_month: 100_000,
            max_api_calls_per_month: 100_000,
            max_storage_bytes: 1 << 30,
            queries_per_minute: 60,
            api_calls_per_second: 10,
            max_phase: 1,
        }
    }

    /// Professional tier defaults.
    pub fn professional() -> Self {
        Self {
            max_concepts: 1_000_000,
            max_queries_per_month: 1_000_000,
            max_api_calls_per_month: 1_000_000,
            max_storage_bytes: 10 << 30,
            queries_per_minute: 600,
            api_calls_per_second: 100,
            max_phase: 4,
        }
    }
}

// =============================================================================
// SYNC
// =============================================================================

/// Direction of a synchronizer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Relational rows → concepts.
    Forward,
    /// Concept deltas → relational writeback.
    Backward,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

/// Conflict resolution policy, selectable per mapping rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Whichever side carries the newer `updated_at` wins.
    #[default]
    LastWriterWins,
    PreferRelational,
    PreferConcept,
    /// Stage the conflict in the quarantine; apply nothing.
    Manual,
}

/// Persisted resume point for one sync pipeline and table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub direction: SyncDirection,
    /// Table (forward) or source scope (backward) this checkpoint covers.
    pub scope: String,
    pub last_updated_at: DateTime<Utc>,
    pub last_id: String,
    pub row_hash: String,
}

impl SyncCheckpoint {
    /// Starting checkpoint for a scope that has never synced.
    pub fn origin(direction: SyncDirection, scope: impl Into<String>) -> Self {
        Self {
            direction,
            scope: scope.into(),
            last_updated_at: DateTime::<Utc>::MIN_UTC,
            last_id: String::new(),
            row_hash: String::new(),
        }
    }
}

/// A staged conflict awaiting manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedConflict {
    pub source_key: String,
    pub table: String,
    pub relational_updated_at: Option<DateTime<Utc>>,
    pub concept_updated_at: Option<DateTime<Utc>>,
    pub detail: String,
    pub staged_at: DateTime<Utc>,
}

/// Synchronizer status surfaced through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_forward_checkpoint: Option<SyncCheckpoint>,
    pub last_backward_checkpoint: Option<SyncCheckpoint>,
    pub pending: u64,
    pub quarantine_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_concept() -> Concept {
        let now = Utc::now();
        Concept {
            id: Uuid::new_v4(),
            name: "Premium Customer".to_string(),
            description: "High lifetime value".to_string(),
            vector: Some(vec![0.0; 4]),
            metadata: JsonMap::new(),
            usage_count: 0,
            strength: 0.5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_relation_type_roundtrip() {
        for kind in RelationType::ALL {
            let parsed: RelationType = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("friend_of".parse::<RelationType>().is_err());
    }

    #[test]
    fn test_relation_type_sort_order_is_stable() {
        let mut kinds = vec![
            RelationType::OppositeOf,
            RelationType::IsA,
            RelationType::RelatedTo,
            RelationType::PartOf,
        ];
        kinds.sort();
        assert_eq!(kinds, RelationType::ALL.to_vec());
    }

    #[test]
    fn test_concept_embedding_text() {
        let mut c = sample_concept();
        assert_eq!(c.embedding_text(), "Premium Customer: High lifetime value");
        c.description.clear();
        assert_eq!(c.embedding_text(), "Premium Customer");
    }

    #[test]
    fn test_concept_source_key_lookup() {
        let mut c = sample_concept();
        assert!(c.source_key().is_none());
        c.metadata.insert(
            Concept::SOURCE_KEY.to_string(),
            json!("customers:42"),
        );
        assert_eq!(c.source_key(), Some("customers:42"));
    }

    #[test]
    fn test_sql_row_primary_key() {
        let mut columns = JsonMap::new();
        columns.insert("id".to_string(), json!(7));
        columns.insert("name".to_string(), json!("widget"));
        let row = SqlRow::new(columns);
        assert_eq!(row.primary_key(), Some("7".to_string()));

        let mut columns = JsonMap::new();
        columns.insert("id".to_string(), json!("abc"));
        assert_eq!(SqlRow::new(columns).primary_key(), Some("abc".to_string()));

        assert!(SqlRow::default().primary_key().is_none());
    }

    #[test]
    fn test_result_item_merge_keys_distinct() {
        let mut columns = JsonMap::new();
        columns.insert("id".to_string(), json!(1));
        let row = ResultItem::Row(SqlRow::new(columns));

        let concept = ResultItem::Concept(ScoredConcept {
            concept: sample_concept(),
            score: 0.88,
        });

        assert!(row.merge_key().starts_with("row:"));
        assert!(concept.merge_key().starts_with("concept:"));
        assert_ne!(row.merge_key(), concept.merge_key());
    }

    #[test]
    fn test_result_item_scores() {
        let row = ResultItem::Row(SqlRow::default());
        assert_eq!(row.score(), 1.0);

        let concept = ResultItem::Concept(ScoredConcept {
            concept: sample_concept(),
            score: 0.42,
        });
        assert_eq!(concept.score(), 0.42);
    }

    #[test]
    fn test_phase_ratios_and_targets() {
        assert_eq!(Phase::One.concept_ratio(), 0.1);
        assert_eq!(Phase::Two.concept_ratio(), 0.3);
        assert_eq!(Phase::Three.concept_ratio(), 0.7);
        assert_eq!(Phase::Four.concept_ratio(), 1.0);

        assert_eq!(Phase::Two.advancement_target(), Some(0.20));
        assert_eq!(Phase::Three.advancement_target(), Some(0.50));
        assert_eq!(Phase::Four.advancement_target(), Some(0.80));
        assert!(Phase::One.advancement_target().is_none());
    }

    #[test]
    fn test_phase_next_stops_at_four() {
        assert_eq!(Phase::One.next(), Some(Phase::Two));
        assert_eq!(Phase::Three.next(), Some(Phase::Four));
        assert_eq!(Phase::Four.next(), None);
    }

    #[test]
    fn test_phase_serde_as_number() {
        let json = serde_json::to_string(&Phase::Three).unwrap();
        assert_eq!(json, "3");
        let parsed: Phase = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, Phase::Two);
        assert!(serde_json::from_str::<Phase>("9").is_err());
    }

    #[test]
    fn test_evolution_state_default() {
        let state = EvolutionState::default();
        assert_eq!(state.phase, Phase::One);
        assert_eq!(state.concept_ratio, 0.1);
        assert_eq!(state.counters.total, 0);
    }

    #[test]
    fn test_query_options_default() {
        let opts = QueryOptions::default();
        assert_eq!(opts.k, crate::defaults::SEMANTIC_K);
        assert!(opts.preferred.is_none());
        assert!(opts.deadline_ms.is_none());
    }

    #[test]
    fn test_quota_limits_tiers() {
        let free = QuotaLimits::free();
        let pro = QuotaLimits::professional();
        assert!(pro.max_concepts > free.max_concepts);
        assert!(pro.queries_per_minute > free.queries_per_minute);
        assert_eq!(free.max_phase, 1);
        assert_eq!(pro.max_phase, 4);
    }

    #[test]
    fn test_sync_checkpoint_origin() {
        let cp = SyncCheckpoint::origin(SyncDirection::Forward, "customers");
        assert_eq!(cp.direction, SyncDirection::Forward);
        assert_eq!(cp.scope, "customers");
        assert!(cp.last_id.is_empty());
        assert_eq!(cp.last_updated_at, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_route_info_serialization() {
        let info = RouteInfo {
            kind: QueryKind::Hybrid,
            confidence: 0.75,
            cached: false,
            degraded: true,
            partial_error: Some("Deadline exceeded: semantic branch".to_string()),
            sql_latency_ms: Some(40),
            semantic_latency_ms: None,
            latency_ms: 41,
        };
        let json = serde_json::to_string(&info).unwrap();
        let parsed: RouteInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, QueryKind::Hybrid);
        assert!(parsed.degraded);
        assert!(parsed.partial_error.unwrap().contains("Deadline"));
    }

    #[test]
    fn test_conflict_policy_default_is_lww() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::LastWriterWins);
    }
}

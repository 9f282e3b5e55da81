//! Structured logging schema and field name constants for janus.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, phase transitions, sync completions |
//! | DEBUG | Routing decisions, intermediate values, config choices |
//! | TRACE | Per-item iteration (search hits, sync rows) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "router", "concepts", "sync", "evolution", "quota", "backends"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "intent", "merge", "store", "forward", "token_bucket"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "execute", "semantic_search", "merge", "run_forward"
pub const OPERATION: &str = "op";

/// Tenant the operation runs for.
pub const TENANT: &str = "tenant";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Concept UUID being operated on.
pub const CONCEPT_ID: &str = "concept_id";

/// Query text (router).
pub const QUERY: &str = "query";

/// Query fingerprint used for caching and log correlation.
pub const FINGERPRINT: &str = "fingerprint";

/// Relational table under sync.
pub const TABLE: &str = "table";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned.
pub const RESULT_COUNT: &str = "result_count";

/// Routing confidence.
pub const CONFIDENCE: &str = "confidence";

/// Rows/items applied by a sync batch.
pub const APPLIED: &str = "applied";

/// Rows/items skipped as already-applied by a sync batch.
pub const SKIPPED: &str = "skipped";

/// Rows/items failed within a sync batch.
pub const FAILED: &str = "failed";

// ─── Routing fields ────────────────────────────────────────────────────────

/// Routed kind ("sql", "semantic", "hybrid").
pub const ROUTE_KIND: &str = "kind";

/// Whether the reply was served from cache.
pub const CACHED: &str = "cached";

/// Whether one hybrid branch failed while the other served.
pub const DEGRADED: &str = "degraded";

// ─── Evolution fields ──────────────────────────────────────────────────────

/// Current evolution phase number.
pub const PHASE: &str = "phase";

/// Current concept ratio.
pub const CONCEPT_RATIO: &str = "concept_ratio";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

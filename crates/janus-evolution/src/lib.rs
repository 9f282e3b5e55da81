//! # janus-evolution
//!
//! The evolution tracker: aggregates routing outcomes, evaluates phase
//! advancement, and publishes the routing bias to intent analyzers.
//!
//! The tracker is write-serialized (single writer behind a mutex, many
//! readers); readers subscribe to a watch channel and may see a snapshot at
//! most one update stale. The phase only advances; regression is never
//! automatic.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use janus_core::{
    defaults, Error, EvolutionSignal, EvolutionState, EvolutionStateStore, Phase, QueryKind,
    Result, RouteObservation, RouteObserver,
};

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    /// Rolling observation window size.
    pub window: usize,
    /// Observations required since the last advancement.
    pub min_queries: u64,
    /// Minimum average confidence on successful semantic queries.
    pub confidence_floor: f32,
    /// Absolute semantic p95 ceiling in milliseconds.
    pub p95_ceiling_ms: u64,
    /// Relative ceiling: semantic p95 vs sql p95.
    pub p95_factor: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            window: defaults::EVOLUTION_WINDOW,
            min_queries: defaults::EVOLUTION_MIN_QUERIES,
            confidence_floor: defaults::SEMANTIC_CONFIDENCE_FLOOR,
            p95_ceiling_ms: defaults::SEMANTIC_P95_CEILING_MS,
            p95_factor: defaults::SEMANTIC_P95_FACTOR,
        }
    }
}

/// Snapshot of the tracker's aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionMetrics {
    pub phase: Phase,
    pub concept_ratio: f32,
    pub total: u64,
    pub sql_queries: u64,
    pub semantic_queries: u64,
    pub hybrid_queries: u64,
    pub merge_hits: u64,
    pub cache_hits: u64,
    pub sql_ratio: f32,
    pub semantic_ratio: f32,
    pub hybrid_ratio: f32,
    pub avg_semantic_confidence: f32,
    pub sql_p95_ms: Option<u64>,
    pub semantic_p95_ms: Option<u64>,
    pub observed_since_advancement: u64,
}

/// Outcome of an advancement evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancementDecision {
    pub ready: bool,
    pub target: Option<Phase>,
    /// Unmet preconditions, empty when ready.
    pub blocking: Vec<String>,
}

struct TrackerState {
    state: EvolutionState,
    window: VecDeque<RouteObservation>,
    since_advancement: u64,
}

/// The process-wide evolution tracker.
pub struct EvolutionTracker {
    config: EvolutionConfig,
    inner: Mutex<TrackerState>,
    signal_tx: watch::Sender<EvolutionSignal>,
    store: Option<Arc<dyn EvolutionStateStore>>,
}

impl EvolutionTracker {
    /// Create a tracker starting from the default (phase 1) state.
    pub fn new(config: EvolutionConfig) -> Self {
        Self::with_state(config, EvolutionState::default(), None)
    }

    /// Restore the tracker from a persisted state store. Falls back to the
    /// default state on first boot.
    pub async fn restore(
        config: EvolutionConfig,
        store: Arc<dyn EvolutionStateStore>,
    ) -> Result<Self> {
        let state = store.load().await?.unwrap_or_default();
        Ok(Self::with_state(config, state, Some(store)))
    }

    fn with_state(
        config: EvolutionConfig,
        state: EvolutionState,
        store: Option<Arc<dyn EvolutionStateStore>>,
    ) -> Self {
        let signal = EvolutionSignal {
            phase: state.phase,
            concept_ratio: state.concept_ratio,
        };
        let (signal_tx, _) = watch::channel(signal);
        let window_cap = config.window;
        Self {
            config,
            inner: Mutex::new(TrackerState {
                state,
                window: VecDeque::with_capacity(window_cap),
                since_advancement: 0,
            }),
            signal_tx,
            store,
        }
    }

    /// Subscribe to phase/ratio updates. Read on the next intent decision;
    /// no restart needed.
    pub fn subscribe(&self) -> watch::Receiver<EvolutionSignal> {
        self.signal_tx.subscribe()
    }

    /// Record one routing outcome.
    pub async fn record(&self, observation: RouteObservation) {
        let mut inner = self.inner.lock().await;
        let counters = &mut inner.state.counters;
        counters.total += 1;
        match observation.kind {
            QueryKind::Sql => counters.sql_queries += 1,
            QueryKind::Semantic => counters.semantic_queries += 1,
            QueryKind::Hybrid => counters.hybrid_queries += 1,
        }
        if observation.merged {
            counters.merge_hits += 1;
        }
        if observation.cached {
            counters.cache_hits += 1;
        }

        if inner.window.len() == self.config.window {
            inner.window.pop_front();
        }
        inner.window.push_back(observation);
        inner.since_advancement += 1;
    }

    /// Current aggregates.
    pub async fn snapshot(&self) -> EvolutionMetrics {
        let inner = self.inner.lock().await;
        let counters = inner.state.counters;
        let total = counters.total.max(1) as f32;

        let mut sql_latencies: Vec<u64> = Vec::new();
        let mut semantic_latencies: Vec<u64> = Vec::new();
        let mut semantic_confidences: Vec<f32> = Vec::new();
        for obs in &inner.window {
            if let Some(ms) = obs.sql_latency_ms {
                sql_latencies.push(ms);
            }
            if let Some(ms) = obs.semantic_latency_ms {
                semantic_latencies.push(ms);
            }
            if obs.kind == QueryKind::Semantic && obs.succeeded {
                semantic_confidences.push(obs.confidence);
            }
        }

        let avg_semantic_confidence = if semantic_confidences.is_empty() {
            0.0
        } else {
            semantic_confidences.iter().sum::<f32>() / semantic_confidences.len() as f32
        };

        EvolutionMetrics {
            phase: inner.state.phase,
            concept_ratio: inner.state.concept_ratio,
            total: counters.total,
            sql_queries: counters.sql_queries,
            semantic_queries: counters.semantic_queries,
            hybrid_queries: counters.hybrid_queries,
            merge_hits: counters.merge_hits,
            cache_hits: counters.cache_hits,
            sql_ratio: counters.sql_queries as f32 / total,
            semantic_ratio: counters.semantic_queries as f32 / total,
            hybrid_ratio: counters.hybrid_queries as f32 / total,
            avg_semantic_confidence,
            sql_p95_ms: p95(&mut sql_latencies),
            semantic_p95_ms: p95(&mut semantic_latencies),
            observed_since_advancement: inner.since_advancement,
        }
    }

    /// Evaluate whether the system may advance to the next phase.
    pub async fn evaluate_advancement(&self) -> AdvancementDecision {
        let metrics = self.snapshot().await;
        let inner = self.inner.lock().await;

        let target = match inner.state.phase.next() {
            Some(target) => target,
            None => {
                return AdvancementDecision {
                    ready: false,
                    target: None,
                    blocking: vec!["Already at maximum phase".to_string()],
                }
            }
        };

        let mut blocking = Vec::new();

        let window_total = inner.window.len().max(1) as f32;
        let window_semantic = inner
            .window
            .iter()
            .filter(|o| o.kind == QueryKind::Semantic)
            .count() as f32;
        let concept_share = window_semantic / window_total;
        let share_target = target.advancement_target().unwrap_or(1.0);
        if concept_share < share_target {
            blocking.push(format!(
                "Concept share {:.1}% < {:.1}%",
                concept_share * 100.0,
                share_target * 100.0
            ));
        }

        if metrics.avg_semantic_confidence < self.config.confidence_floor {
            blocking.push(format!(
                "Average semantic confidence {:.2} < {:.2}",
                metrics.avg_semantic_confidence, self.config.confidence_floor
            ));
        }

        let latency_ok = match (metrics.semantic_p95_ms, metrics.sql_p95_ms) {
            (Some(semantic), Some(sql)) => {
                (semantic as f64) <= (sql as f64) * self.config.p95_factor
                    || semantic <= self.config.p95_ceiling_ms
            }
            (Some(semantic), None) => semantic <= self.config.p95_ceiling_ms,
            (None, _) => false,
        };
        if !latency_ok {
            blocking.push(format!(
                "Semantic p95 {:?}ms exceeds both {}x sql p95 {:?}ms and {}ms",
                metrics.semantic_p95_ms,
                self.config.p95_factor,
                metrics.sql_p95_ms,
                self.config.p95_ceiling_ms
            ));
        }

        if inner.since_advancement < self.config.min_queries {
            blocking.push(format!(
                "Only {} queries since last advancement (need {})",
                inner.since_advancement, self.config.min_queries
            ));
        }

        AdvancementDecision {
            ready: blocking.is_empty(),
            target: Some(target),
            blocking,
        }
    }

    /// Advance one phase if all preconditions hold.
    pub async fn advance(&self) -> Result<EvolutionState> {
        self.trigger(None, false).await
    }

    /// Manual trigger. `force` bypasses the evaluator's preconditions but
    /// never allows regression.
    pub async fn trigger(&self, target: Option<Phase>, force: bool) -> Result<EvolutionState> {
        let current = self.inner.lock().await.state.phase;
        let target = match target {
            Some(target) => target,
            None => current
                .next()
                .ok_or_else(|| Error::InvalidInput("Already at maximum phase".to_string()))?,
        };

        if target <= current {
            return Err(Error::InvalidInput(format!(
                "Phase only advances (current {}, requested {})",
                current.number(),
                target.number()
            )));
        }

        if !force {
            if target != current.next().unwrap_or(target) {
                return Err(Error::InvalidInput(
                    "Phases advance one step at a time unless forced".to_string(),
                ));
            }
            let decision = self.evaluate_advancement().await;
            if !decision.ready {
                return Err(Error::InvalidInput(format!(
                    "Not ready for advancement: {}",
                    decision.blocking.join("; ")
                )));
            }
        }

        let state = {
            let mut inner = self.inner.lock().await;
            inner.state.phase = target;
            inner.state.concept_ratio = target.concept_ratio();
            inner.state.updated_at = Utc::now();
            inner.since_advancement = 0;
            inner.state.clone()
        };

        if let Some(store) = &self.store {
            store.save(&state).await?;
        }

        let _ = self.signal_tx.send(EvolutionSignal {
            phase: state.phase,
            concept_ratio: state.concept_ratio,
        });

        info!(
            subsystem = "evolution",
            phase = state.phase.number(),
            concept_ratio = state.concept_ratio,
            forced = force,
            "Evolution phase advanced"
        );
        Ok(state)
    }
}

#[async_trait]
impl RouteObserver for EvolutionTracker {
    async fn observe(&self, observation: RouteObservation) {
        self.record(observation).await;
        debug!(
            subsystem = "evolution",
            op = "observe",
            kind = %observation.kind,
            "Routing outcome recorded"
        );
    }
}

/// p95 over a set of latencies; None when empty.
fn p95(values: &mut Vec<u64>) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = ((values.len() as f64) * 0.95).ceil() as usize;
    values.get(rank.saturating_sub(1).min(values.len() - 1)).copied()
}

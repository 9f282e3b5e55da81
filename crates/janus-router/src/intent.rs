//! Intent classification: a deterministic tier that is always available,
//! with an optional LLM tier behind a hard deadline.
//!
//! The deterministic tier is the authority; the LLM decision replaces it
//! only when its reported confidence clears the deterministic confidence by
//! a configurable margin.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use janus_core::{
    defaults, Error, EvolutionSignal, IntentDecision, IntentProvider, QueryKind, QueryOptions,
    Result,
};

/// Statements that are SQL regardless of anything else in the text.
const STRONG_SQL_PREFIXES: [&str; 9] = [
    "select", "insert", "update", "delete", "with", "create", "drop", "alter", "explain",
];

/// Tokens indicating structured queries.
const SQL_TOKENS: [&str; 6] = ["from", "where", "join", "group by", "order by", "limit"];

/// Tokens indicating semantic/natural-language queries. `like` and
/// `show me` get special handling below.
const SEMANTIC_TOKENS: [&str; 9] = [
    "similar", "related", "about", "might", "probably", "seems", "find", "who", "what",
];

const EPSILON: f32 = 1e-6;

/// Deterministic + optional-LLM intent analyzer.
///
/// The evolution bias arrives through a watch channel and is read at
/// decision time, so phase advancements change routing without a restart.
pub struct IntentAnalyzer {
    signal: watch::Receiver<EvolutionSignal>,
    llm: Option<Arc<dyn IntentProvider>>,
    llm_margin: f32,
    llm_deadline: Duration,
}

impl IntentAnalyzer {
    pub fn new(signal: watch::Receiver<EvolutionSignal>) -> Self {
        Self {
            signal,
            llm: None,
            llm_margin: defaults::LLM_CONFIDENCE_MARGIN,
            llm_deadline: Duration::from_millis(defaults::LLM_INTENT_DEADLINE_MS),
        }
    }

    /// Attach the optional LLM tier.
    pub fn with_llm(mut self, provider: Arc<dyn IntentProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    /// Override the LLM confidence margin (default 0.15).
    pub fn with_llm_margin(mut self, margin: f32) -> Self {
        self.llm_margin = margin;
        self
    }

    /// Classify a query. Fails with `EmptyQuery` on blank input.
    pub async fn analyze(&self, query: &str, opts: &QueryOptions) -> Result<IntentDecision> {
        let deterministic = self.analyze_deterministic(query, opts)?;

        // The strong-SQL form is never second-guessed.
        if deterministic.kind == QueryKind::Sql && deterministic.confidence >= 1.0 {
            return Ok(deterministic);
        }

        if let Some(provider) = &self.llm {
            match tokio::time::timeout(self.llm_deadline, provider.classify(query)).await {
                Ok(Ok(llm)) => {
                    if llm.confidence >= deterministic.confidence + self.llm_margin {
                        debug!(
                            subsystem = "router",
                            component = "intent",
                            kind = %llm.kind,
                            confidence = llm.confidence,
                            "LLM tier overrode deterministic decision"
                        );
                        return Ok(llm);
                    }
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "LLM intent tier failed, using deterministic decision");
                }
                Err(_) => {
                    debug!("LLM intent tier exceeded deadline, using deterministic decision");
                }
            }
        }

        Ok(deterministic)
    }

    /// The deterministic tier, always available.
    pub fn analyze_deterministic(
        &self,
        query: &str,
        opts: &QueryOptions,
    ) -> Result<IntentDecision> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let lower = trimmed.to_lowercase();

        if let Some(first) = lower.split_whitespace().next() {
            if STRONG_SQL_PREFIXES.contains(&first) {
                return Ok(IntentDecision {
                    kind: QueryKind::Sql,
                    confidence: 1.0,
                    reasoning: format!("Statement starts with SQL keyword '{}'", first),
                });
            }
        }

        let mut sql_hits = SQL_TOKENS
            .iter()
            .filter(|t| contains_token(&lower, t))
            .count();
        sql_hits += ['=', '<', '>'].iter().filter(|c| lower.contains(**c)).count();

        let mut semantic_hits = SEMANTIC_TOKENS
            .iter()
            .filter(|t| contains_token(&lower, t))
            .count();
        // `like` is semantic only when it is not a SQL LIKE pattern.
        if contains_token(&lower, "like") && !like_precedes_literal(&lower) {
            semantic_hits += 1;
        }
        // `show me X` has a direct relational rendering (a LIMITed listing),
        // so it signals both sides and keeps mixed listings on the hybrid path.
        if lower.contains("show me") {
            semantic_hits += 1;
            sql_hits += 1;
        }

        // A preferred-layer hint weighs in as one extra token of evidence.
        match opts.preferred {
            Some(QueryKind::Sql) => sql_hits += 1,
            Some(QueryKind::Semantic) => semantic_hits += 1,
            _ => {}
        }

        let s = semantic_hits as f32 / (sql_hits as f32 + semantic_hits as f32 + EPSILON);

        // Evolution bias: inflate the semantic side by (1 + concept_ratio)
        // and renormalize, then classify on the biased share. This is how
        // evolution changes behavior without code changes.
        let ratio = self.signal.borrow().concept_ratio;
        let biased = (s * (1.0 + ratio)) / (s * (1.0 + ratio) + (1.0 - s) + EPSILON);

        let decision = if biased >= defaults::SEMANTIC_ROUTE_THRESHOLD {
            IntentDecision {
                kind: QueryKind::Semantic,
                confidence: biased.min(1.0),
                reasoning: format!(
                    "Semantic share {:.2} (sql_hits={}, semantic_hits={}, bias={:.2})",
                    biased, sql_hits, semantic_hits, ratio
                ),
            }
        } else if biased <= defaults::SQL_ROUTE_THRESHOLD && sql_hits >= 1 {
            IntentDecision {
                kind: QueryKind::Sql,
                confidence: (1.0 - biased).min(1.0),
                reasoning: format!(
                    "SQL share {:.2} (sql_hits={}, semantic_hits={})",
                    1.0 - biased,
                    sql_hits,
                    semantic_hits
                ),
            }
        } else {
            IntentDecision {
                kind: QueryKind::Hybrid,
                confidence: (0.5 + (biased - 0.5).abs()).min(1.0),
                reasoning: format!(
                    "Mixed signals, semantic share {:.2} (sql_hits={}, semantic_hits={})",
                    biased, sql_hits, semantic_hits
                ),
            }
        };

        Ok(decision)
    }
}

/// Token presence with word boundaries (multi-word tokens use substring
/// matching on normalized whitespace).
fn contains_token(haystack: &str, token: &str) -> bool {
    if token.contains(' ') {
        return haystack.contains(token);
    }
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word == token)
}

/// True when the first `like` is immediately followed by a quoted literal
/// (a SQL LIKE pattern).
fn like_precedes_literal(lower: &str) -> bool {
    if let Some(pos) = lower.find("like") {
        let rest = lower[pos + 4..].trim_start();
        return rest.starts_with('\'') || rest.starts_with('"');
    }
    false
}

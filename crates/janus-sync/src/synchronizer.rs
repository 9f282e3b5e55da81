//! The bidirectional synchronizer: forward (rows → concepts) and backward
//! (concept deltas → relational writeback) pipelines with checkpointing,
//! conflict resolution, and adaptive batch sizing.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use janus_concepts::ConceptStore;
use janus_core::{
    defaults, row_hash, CheckpointStore, Concept, ConceptPatch, ConflictPolicy, NewConcept,
    QuarantinedConflict, RelationalStore, Result, SqlRow, SyncCheckpoint, SyncDirection,
    SyncStatus,
};

use crate::mapping::MappingRule;

/// Result of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
    pub quarantined: u64,
}

impl SyncReport {
    fn absorb(&mut self, other: &SyncReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.quarantined += other.quarantined;
    }

    fn items(&self) -> u64 {
        self.applied + self.skipped + self.failed + self.quarantined
    }
}

enum RowOutcome {
    Applied,
    Skipped,
    Quarantined,
}

struct SyncState {
    batch_size: usize,
    clean_windows: u32,
    quarantine: Vec<QuarantinedConflict>,
    pending_estimate: u64,
}

/// Keeps the relational layer and the concept layer consistent in both
/// directions.
pub struct Synchronizer {
    relational: Arc<dyn RelationalStore>,
    concepts: Arc<ConceptStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    rules: Vec<MappingRule>,
    batch_cap: usize,
    state: Mutex<SyncState>,
}

impl Synchronizer {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        concepts: Arc<ConceptStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        rules: Vec<MappingRule>,
    ) -> Self {
        let batch_cap = defaults::SYNC_BATCH_CAP;
        Self {
            relational,
            concepts,
            checkpoints,
            rules,
            batch_cap,
            state: Mutex::new(SyncState {
                batch_size: batch_cap,
                clean_windows: 0,
                quarantine: Vec::new(),
                pending_estimate: 0,
            }),
        }
    }

    /// Override the batch cap (also the starting batch size).
    pub fn with_batch_cap(mut self, cap: usize) -> Self {
        self.batch_cap = cap.max(1);
        self.state = Mutex::new(SyncState {
            batch_size: self.batch_cap,
            clean_windows: 0,
            quarantine: Vec::new(),
            pending_estimate: 0,
        });
        self
    }

    /// Current batch size (shrinks under backpressure).
    pub async fn batch_size(&self) -> usize {
        self.state.lock().await.batch_size
    }

    /// Staged conflicts awaiting manual resolution.
    pub async fn quarantine(&self) -> Vec<QuarantinedConflict> {
        self.state.lock().await.quarantine.clone()
    }

    /// Run one pipeline in the given direction.
    pub async fn run(&self, direction: SyncDirection) -> Result<SyncReport> {
        match direction {
            SyncDirection::Forward => self.run_forward().await,
            SyncDirection::Backward => self.run_backward().await,
        }
    }

    /// Forward pipeline: relational rows → concepts.
    #[instrument(skip(self), fields(subsystem = "sync", component = "forward", op = "run_forward"))]
    pub async fn run_forward(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for rule in &self.rules {
            let table_report = self.forward_table(rule).await?;
            report.absorb(&table_report);
        }
        self.apply_backpressure(&report).await;

        info!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "Forward sync complete"
        );
        Ok(report)
    }

    async fn forward_table(&self, rule: &MappingRule) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let checkpoint = self
            .checkpoints
            .load(SyncDirection::Forward, &rule.table)
            .await?
            .unwrap_or_else(|| SyncCheckpoint::origin(SyncDirection::Forward, &rule.table));

        let batch_size = self.state.lock().await.batch_size;

        // Re-fetch a sliver before the boundary so rows sharing the
        // checkpoint timestamp are seen; row-hash idempotence skips them.
        let since = checkpoint
            .last_updated_at
            .checked_sub_signed(ChronoDuration::milliseconds(1))
            .unwrap_or(checkpoint.last_updated_at);

        let rows = self
            .relational
            .changed_rows(&rule.table, &rule.primary_key, since, batch_size as i64)
            .await?;
        let fetched = rows.len();

        let mut last_committed: Option<SyncCheckpoint> = None;
        let mut processed = 0usize;
        for row in &rows {
            processed += 1;
            match self.apply_forward_row(rule, row, &checkpoint).await {
                Ok(outcome) => {
                    match outcome {
                        RowOutcome::Applied => report.applied += 1,
                        RowOutcome::Skipped => report.skipped += 1,
                        RowOutcome::Quarantined => report.quarantined += 1,
                    }
                    if let (Some(ts), Some(pk)) = (row.updated_at(), row.get(&rule.primary_key)) {
                        last_committed = Some(SyncCheckpoint {
                            direction: SyncDirection::Forward,
                            scope: rule.table.clone(),
                            last_updated_at: ts,
                            last_id: match pk {
                                JsonValue::String(s) => s.clone(),
                                other => other.to_string(),
                            },
                            row_hash: row_hash(row),
                        });
                    }
                }
                Err(e) => {
                    // Batches commit as a unit: the checkpoint stays at the
                    // last committed row and the rest retries next run.
                    warn!(table = %rule.table, error = %e, "Forward row failed, aborting batch");
                    report.failed += 1;
                    break;
                }
            }
        }

        if let Some(checkpoint) = last_committed {
            self.checkpoints.save(&checkpoint).await?;
        }

        let leftover = (fetched - processed) as u64;
        let mut state = self.state.lock().await;
        state.pending_estimate = leftover + if fetched == batch_size { batch_size as u64 } else { 0 };

        debug!(
            table = %rule.table,
            fetched,
            applied = report.applied,
            skipped = report.skipped,
            "Forward table pass complete"
        );
        Ok(report)
    }

    async fn apply_forward_row(
        &self,
        rule: &MappingRule,
        row: &SqlRow,
        checkpoint: &SyncCheckpoint,
    ) -> Result<RowOutcome> {
        let pk = row
            .get(&rule.primary_key)
            .ok_or_else(|| {
                janus_core::Error::InvalidInput(format!(
                    "Row in {} lacks primary key {}",
                    rule.table, rule.primary_key
                ))
            })?
            .clone();
        let source_key = rule.source_key(&pk);
        let hash = row_hash(row);

        let existing = self.concepts.find_by_source_key(&source_key).await?;

        if let Some(existing) = &existing {
            // Re-seeing the same (source_key, row_hash) is a no-op.
            if existing.row_hash() == Some(hash.as_str()) {
                return Ok(RowOutcome::Skipped);
            }

            // Both sides changed since the last sync: resolve per policy.
            let concept_changed = existing.updated_at > checkpoint.last_updated_at;
            if concept_changed {
                match rule.conflict_policy {
                    ConflictPolicy::LastWriterWins => {
                        let row_newer = row
                            .updated_at()
                            .map(|ts| ts >= existing.updated_at)
                            .unwrap_or(true);
                        if !row_newer {
                            return Ok(RowOutcome::Skipped);
                        }
                    }
                    ConflictPolicy::PreferRelational => {}
                    ConflictPolicy::PreferConcept => return Ok(RowOutcome::Skipped),
                    ConflictPolicy::Manual => {
                        self.state.lock().await.quarantine.push(QuarantinedConflict {
                            source_key: source_key.clone(),
                            table: rule.table.clone(),
                            relational_updated_at: row.updated_at(),
                            concept_updated_at: Some(existing.updated_at),
                            detail: "Both sides changed since last sync".to_string(),
                            staged_at: Utc::now(),
                        });
                        return Ok(RowOutcome::Quarantined);
                    }
                }
            }
        }

        let name = rule.concept_name(row);
        let description = rule.concept_description(row);
        let metadata = rule.concept_metadata(row, &source_key, &hash);

        match existing {
            Some(existing) => {
                self.concepts
                    .update(
                        existing.id,
                        ConceptPatch {
                            name: Some(name),
                            description: Some(description),
                            metadata: Some(metadata),
                        },
                    )
                    .await?;
            }
            None => {
                self.concepts
                    .create(NewConcept {
                        id: None,
                        name,
                        description,
                        vector: None,
                        metadata,
                    })
                    .await?;
            }
        }
        Ok(RowOutcome::Applied)
    }

    /// Backward pipeline: concept deltas → relational writeback.
    #[instrument(skip(self), fields(subsystem = "sync", component = "backward", op = "run_backward"))]
    pub async fn run_backward(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for rule in &self.rules {
            if rule.writeback_columns.is_empty() {
                continue;
            }
            let table_report = self.backward_table(rule).await?;
            report.absorb(&table_report);
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            "Backward sync complete"
        );
        Ok(report)
    }

    async fn backward_table(&self, rule: &MappingRule) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let checkpoint = self
            .checkpoints
            .load(SyncDirection::Backward, &rule.table)
            .await?
            .unwrap_or_else(|| SyncCheckpoint::origin(SyncDirection::Backward, &rule.table));

        let batch_size = self.state.lock().await.batch_size;
        let changed = self
            .concepts
            .updated_since(checkpoint.last_updated_at, batch_size as i64)
            .await?;

        let mut last_committed: Option<SyncCheckpoint> = None;
        for concept in changed {
            let source_key = match concept.source_key() {
                Some(key) if rule.owns_source_key(key) => key.to_string(),
                _ => continue,
            };

            match self
                .apply_backward_concept(rule, &concept, &source_key, &checkpoint)
                .await
            {
                Ok(RowOutcome::Applied) => report.applied += 1,
                Ok(RowOutcome::Skipped) => report.skipped += 1,
                Ok(RowOutcome::Quarantined) => report.quarantined += 1,
                Err(e) => {
                    warn!(source_key = %source_key, error = %e, "Backward writeback failed, aborting batch");
                    report.failed += 1;
                    break;
                }
            }

            last_committed = Some(SyncCheckpoint {
                direction: SyncDirection::Backward,
                scope: rule.table.clone(),
                last_updated_at: concept.updated_at,
                last_id: concept.id.to_string(),
                row_hash: concept.row_hash().unwrap_or_default().to_string(),
            });
        }

        if let Some(checkpoint) = last_committed {
            self.checkpoints.save(&checkpoint).await?;
        }
        Ok(report)
    }

    async fn apply_backward_concept(
        &self,
        rule: &MappingRule,
        concept: &Concept,
        source_key: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<RowOutcome> {
        let pk_text = match rule.pk_from_source_key(source_key) {
            Some(pk) => pk,
            None => return Ok(RowOutcome::Skipped),
        };
        let pk: JsonValue = pk_text
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or_else(|_| JsonValue::String(pk_text.to_string()));

        // Never create relational rows from the backward pipeline.
        let row = match self
            .relational
            .fetch_row(&rule.table, &rule.primary_key, &pk)
            .await?
        {
            Some(row) => row,
            None => return Ok(RowOutcome::Skipped),
        };

        let assignments = rule.writeback_assignments(concept);
        if assignments.is_empty() {
            return Ok(RowOutcome::Skipped);
        }

        // No-op damping: when the row already carries the concept's values
        // (typically right after a forward pass) there is no delta to apply
        // and no conflict worth staging.
        let is_noop = assignments
            .iter()
            .all(|(column, value)| row.get(column) == Some(value));
        if is_noop {
            return Ok(RowOutcome::Skipped);
        }

        // Both sides changed since the last backward sync.
        let row_changed = row
            .updated_at()
            .map(|ts| ts > checkpoint.last_updated_at)
            .unwrap_or(false);
        if row_changed {
            match rule.conflict_policy {
                ConflictPolicy::LastWriterWins => {
                    let concept_newer = row
                        .updated_at()
                        .map(|ts| concept.updated_at >= ts)
                        .unwrap_or(true);
                    if !concept_newer {
                        return Ok(RowOutcome::Skipped);
                    }
                }
                ConflictPolicy::PreferConcept => {}
                ConflictPolicy::PreferRelational => return Ok(RowOutcome::Skipped),
                ConflictPolicy::Manual => {
                    self.state.lock().await.quarantine.push(QuarantinedConflict {
                        source_key: source_key.to_string(),
                        table: rule.table.clone(),
                        relational_updated_at: row.updated_at(),
                        concept_updated_at: Some(concept.updated_at),
                        detail: "Both sides changed since last sync".to_string(),
                        staged_at: Utc::now(),
                    });
                    return Ok(RowOutcome::Quarantined);
                }
            }
        }

        self.relational
            .write_back(&rule.table, &rule.primary_key, &pk, &assignments)
            .await?;
        Ok(RowOutcome::Applied)
    }

    /// Adaptive batch sizing: more than 20% item failures halves the batch;
    /// five consecutive clean windows doubles it back up to the cap.
    async fn apply_backpressure(&self, report: &SyncReport) {
        let items = report.items();
        let ratio = if items == 0 {
            0.0
        } else {
            report.failed as f64 / items as f64
        };

        let mut state = self.state.lock().await;
        if ratio > defaults::SYNC_FAILURE_RATIO {
            state.batch_size = (state.batch_size / 2).max(1);
            state.clean_windows = 0;
            warn!(
                batch_size = state.batch_size,
                failure_ratio = ratio,
                "Sync backpressure: batch size halved"
            );
        } else if report.failed == 0 {
            state.clean_windows += 1;
            if state.clean_windows >= defaults::SYNC_CLEAN_WINDOWS {
                state.batch_size = (state.batch_size * 2).min(self.batch_cap);
                state.clean_windows = 0;
            }
        } else {
            state.clean_windows = 0;
        }
    }

    /// Current synchronizer status.
    pub async fn status(&self) -> Result<SyncStatus> {
        let mut last_forward: Option<SyncCheckpoint> = None;
        let mut last_backward: Option<SyncCheckpoint> = None;
        for rule in &self.rules {
            if let Some(cp) = self
                .checkpoints
                .load(SyncDirection::Forward, &rule.table)
                .await?
            {
                if last_forward
                    .as_ref()
                    .map(|existing| cp.last_updated_at > existing.last_updated_at)
                    .unwrap_or(true)
                {
                    last_forward = Some(cp);
                }
            }
            if let Some(cp) = self
                .checkpoints
                .load(SyncDirection::Backward, &rule.table)
                .await?
            {
                if last_backward
                    .as_ref()
                    .map(|existing| cp.last_updated_at > existing.last_updated_at)
                    .unwrap_or(true)
                {
                    last_backward = Some(cp);
                }
            }
        }

        let state = self.state.lock().await;
        Ok(SyncStatus {
            last_forward_checkpoint: last_forward,
            last_backward_checkpoint: last_backward,
            pending: state.pending_estimate,
            quarantine_count: state.quarantine.len() as u64,
        })
    }
}

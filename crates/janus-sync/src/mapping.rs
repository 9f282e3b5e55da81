//! Per-table mapping rules: how relational rows become concepts and which
//! columns concept deltas may write back.

use serde_json::{Map as JsonMap, Value as JsonValue};

use janus_core::{Concept, ConflictPolicy, SqlRow};

/// Mapping between one relational table and the concept layer.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub table: String,
    pub primary_key: String,
    /// Column providing the concept name.
    pub name_column: String,
    /// Columns concatenated into the concept description.
    pub description_columns: Vec<String>,
    /// Columns copied into concept metadata.
    pub metadata_columns: Vec<String>,
    /// Whitelist of columns backward sync may write. Empty disables
    /// writeback for this table.
    pub writeback_columns: Vec<String>,
    pub conflict_policy: ConflictPolicy,
}

impl MappingRule {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        name_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            name_column: name_column.into(),
            description_columns: Vec::new(),
            metadata_columns: Vec::new(),
            writeback_columns: Vec::new(),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn with_description_columns(mut self, columns: Vec<String>) -> Self {
        self.description_columns = columns;
        self
    }

    pub fn with_metadata_columns(mut self, columns: Vec<String>) -> Self {
        self.metadata_columns = columns;
        self
    }

    pub fn with_writeback_columns(mut self, columns: Vec<String>) -> Self {
        self.writeback_columns = columns;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Deterministic source key tying a concept back to a row.
    pub fn source_key(&self, pk: &JsonValue) -> String {
        let pk_text = match pk {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!("{}:{}", self.table, pk_text)
    }

    /// The table encoded in a source key, when it belongs to this rule.
    pub fn owns_source_key(&self, source_key: &str) -> bool {
        source_key
            .strip_prefix(&self.table)
            .map(|rest| rest.starts_with(':'))
            .unwrap_or(false)
    }

    /// The primary-key text encoded in a source key.
    pub fn pk_from_source_key<'a>(&self, source_key: &'a str) -> Option<&'a str> {
        source_key.strip_prefix(&format!("{}:", self.table))
    }

    /// Concept name for a row, falling back to `"{table} {pk}"`.
    pub fn concept_name(&self, row: &SqlRow) -> String {
        row.get(&self.name_column)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                let pk = row
                    .get(&self.primary_key)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                format!("{} {}", self.table, pk)
            })
    }

    /// Concept description: declared columns joined with newlines.
    pub fn concept_description(&self, row: &SqlRow) -> String {
        self.description_columns
            .iter()
            .filter_map(|column| row.get(column))
            .filter_map(|value| value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Concept metadata: declared columns plus the sync bookkeeping keys.
    pub fn concept_metadata(&self, row: &SqlRow, source_key: &str, row_hash: &str) -> JsonMap<String, JsonValue> {
        let mut metadata = JsonMap::new();
        for column in &self.metadata_columns {
            if let Some(value) = row.get(column) {
                metadata.insert(column.clone(), value.clone());
            }
        }
        metadata.insert(Concept::SOURCE_KEY.to_string(), JsonValue::String(source_key.to_string()));
        metadata.insert(Concept::ROW_HASH.to_string(), JsonValue::String(row_hash.to_string()));
        metadata.insert(
            Concept::MAPPING_RULE.to_string(),
            JsonValue::String(self.table.clone()),
        );
        metadata
    }

    /// Writeback assignments for a concept, restricted to the whitelist.
    pub fn writeback_assignments(&self, concept: &Concept) -> Vec<(String, JsonValue)> {
        let mut assignments = Vec::new();
        for column in &self.writeback_columns {
            if *column == self.name_column {
                assignments.push((column.clone(), JsonValue::String(concept.name.clone())));
            } else if self.description_columns.first() == Some(column) {
                assignments.push((
                    column.clone(),
                    JsonValue::String(concept.description.clone()),
                ));
            } else if let Some(value) = concept.metadata.get(column) {
                assignments.push((column.clone(), value.clone()));
            }
        }
        assignments
    }
}

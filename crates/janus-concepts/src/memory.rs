//! In-memory concept repository for tests and embedded deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use janus_core::{
    Concept, ConceptRepository, Error, Relation, RelationType, Result,
};

/// HashMap-backed implementation of the concept metadata repository.
///
/// Mirrors the Pg repository's surface exactly; vectors are never stored
/// here (the vector engine owns them).
pub struct MemoryConceptRepository {
    inner: Mutex<Inner>,
    fail_next_inserts: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    concepts: HashMap<Uuid, Concept>,
    relations: HashMap<(Uuid, Uuid, RelationType), Relation>,
}

impl MemoryConceptRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_next_inserts: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` inserts fail with a metadata backend error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_next_inserts.store(n, Ordering::SeqCst);
    }

    /// Number of stored relations (test observability).
    pub fn relation_count(&self) -> usize {
        self.inner.lock().unwrap().relations.len()
    }
}

impl Default for MemoryConceptRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConceptRepository for MemoryConceptRepository {
    async fn insert(&self, concept: &Concept) -> Result<()> {
        let remaining = self.fail_next_inserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_inserts.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::MetadataBackend("injected insert failure".to_string()));
        }

        let mut stored = concept.clone();
        stored.vector = None;
        self.inner
            .lock()
            .unwrap()
            .concepts
            .insert(concept.id, stored);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Concept>> {
        Ok(self.inner.lock().unwrap().concepts.get(&id).cloned())
    }

    async fn update(&self, concept: &Concept) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.concepts.contains_key(&concept.id) {
            return Err(Error::ConceptNotFound(concept.id));
        }
        let mut stored = concept.clone();
        stored.vector = None;
        inner.concepts.insert(concept.id, stored);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.concepts.remove(&id);
        inner
            .relations
            .retain(|_, r| r.source_id != id && r.target_id != id);
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.inner.lock().unwrap().concepts.len() as i64)
    }

    async fn record_usage(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(concept) = inner.concepts.get_mut(&id) {
            concept.usage_count += 1;
        }
        Ok(())
    }

    async fn find_by_source_key(&self, source_key: &str) -> Result<Option<Concept>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .concepts
            .values()
            .find(|c| c.source_key() == Some(source_key))
            .cloned())
    }

    async fn updated_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Concept>> {
        let mut concepts: Vec<Concept> = self
            .inner
            .lock()
            .unwrap()
            .concepts
            .values()
            .filter(|c| c.updated_at > since)
            .cloned()
            .collect();
        concepts.sort_by_key(|c| (c.updated_at, c.id));
        concepts.truncate(limit.max(0) as usize);
        Ok(concepts)
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.concepts.contains_key(&relation.source_id) {
            return Err(Error::ConceptNotFound(relation.source_id));
        }
        if !inner.concepts.contains_key(&relation.target_id) {
            return Err(Error::ConceptNotFound(relation.target_id));
        }

        let key = (relation.source_id, relation.target_id, relation.kind);
        match inner.relations.get_mut(&key) {
            // Duplicate edge: higher strength wins.
            Some(existing) => {
                if relation.strength > existing.strength {
                    existing.strength = relation.strength;
                }
            }
            None => {
                inner.relations.insert(key, relation.clone());
            }
        }
        Ok(())
    }

    async fn remove_relation(&self, source: Uuid, target: Uuid, kind: RelationType) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .relations
            .remove(&(source, target, kind));
        Ok(())
    }

    async fn relations_of(&self, id: Uuid) -> Result<Vec<Relation>> {
        let mut relations: Vec<Relation> = self
            .inner
            .lock()
            .unwrap()
            .relations
            .values()
            .filter(|r| r.source_id == id || r.target_id == id)
            .cloned()
            .collect();
        relations.sort_by_key(|r| (r.source_id, r.target_id, r.kind));
        Ok(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn concept(name: &str) -> Concept {
        let now = Utc::now();
        Concept {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            vector: None,
            metadata: serde_json::Map::new(),
            usage_count: 0,
            strength: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_fetch_roundtrip() {
        let repo = MemoryConceptRepository::new();
        let c = concept("alpha");
        repo.insert(&c).await.unwrap();

        let fetched = repo.fetch(c.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "alpha");
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_incident_relations() {
        let repo = MemoryConceptRepository::new();
        let a = concept("a");
        let b = concept("b");
        let c = concept("c");
        for x in [&a, &b, &c] {
            repo.insert(x).await.unwrap();
        }

        let now = Utc::now();
        repo.upsert_relation(&Relation {
            source_id: a.id,
            target_id: b.id,
            kind: RelationType::IsA,
            strength: 0.5,
            created_at: now,
        })
        .await
        .unwrap();
        repo.upsert_relation(&Relation {
            source_id: c.id,
            target_id: a.id,
            kind: RelationType::RelatedTo,
            strength: 0.5,
            created_at: now,
        })
        .await
        .unwrap();
        assert_eq!(repo.relation_count(), 2);

        repo.delete(a.id).await.unwrap();
        assert_eq!(repo.relation_count(), 0);
        assert!(repo.fetch(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_relation_keeps_higher_strength() {
        let repo = MemoryConceptRepository::new();
        let a = concept("a");
        let b = concept("b");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let now = Utc::now();
        let mut rel = Relation {
            source_id: a.id,
            target_id: b.id,
            kind: RelationType::IsA,
            strength: 0.6,
            created_at: now,
        };
        repo.upsert_relation(&rel).await.unwrap();

        rel.strength = 0.4;
        repo.upsert_relation(&rel).await.unwrap();
        let relations = repo.relations_of(a.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].strength - 0.6).abs() < f32::EPSILON);

        rel.strength = 0.9;
        repo.upsert_relation(&rel).await.unwrap();
        let relations = repo.relations_of(a.id).await.unwrap();
        assert!((relations[0].strength - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_at_most_one_edge_per_kind_and_pair() {
        let repo = MemoryConceptRepository::new();
        let a = concept("a");
        let b = concept("b");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let now = Utc::now();
        for _ in 0..3 {
            repo.upsert_relation(&Relation {
                source_id: a.id,
                target_id: b.id,
                kind: RelationType::PartOf,
                strength: 0.5,
                created_at: now,
            })
            .await
            .unwrap();
        }
        assert_eq!(repo.relation_count(), 1);

        // A different kind on the same pair is a distinct edge.
        repo.upsert_relation(&Relation {
            source_id: a.id,
            target_id: b.id,
            kind: RelationType::RelatedTo,
            strength: 0.5,
            created_at: now,
        })
        .await
        .unwrap();
        assert_eq!(repo.relation_count(), 2);
    }

    #[tokio::test]
    async fn test_find_by_source_key() {
        let repo = MemoryConceptRepository::new();
        let mut c = concept("synced");
        c.metadata.insert(
            Concept::SOURCE_KEY.to_string(),
            serde_json::json!("customers:7"),
        );
        repo.insert(&c).await.unwrap();

        let found = repo.find_by_source_key("customers:7").await.unwrap();
        assert_eq!(found.unwrap().id, c.id);
        assert!(repo.find_by_source_key("customers:8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updated_since_ordering() {
        let repo = MemoryConceptRepository::new();
        let mut older = concept("older");
        older.updated_at = Utc::now() - Duration::hours(2);
        let mut newer = concept("newer");
        newer.updated_at = Utc::now();
        repo.insert(&newer).await.unwrap();
        repo.insert(&older).await.unwrap();

        let since = Utc::now() - Duration::hours(3);
        let updated = repo.updated_since(since, 10).await.unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].name, "older");
        assert_eq!(updated[1].name, "newer");
    }

    #[tokio::test]
    async fn test_record_usage_is_monotone() {
        let repo = MemoryConceptRepository::new();
        let c = concept("used");
        repo.insert(&c).await.unwrap();

        repo.record_usage(c.id).await.unwrap();
        repo.record_usage(c.id).await.unwrap();
        assert_eq!(repo.fetch(c.id).await.unwrap().unwrap().usage_count, 2);
    }
}

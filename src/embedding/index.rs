//! In-memory embedding index: label → (vector, owning event ids).
//!
//! The index is rebuilt from stored events at run start (`reindex`), so
//! it needs no durability of its own. Readers always receive cloned
//! entries; every id-set update happens under a single write-guard
//! acquisition, so concurrent attach/detach calls against the same
//! label cannot lose each other's updates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::embedder::Embedder;
use crate::error::EmbeddingError;
use crate::store::StoredEvent;

/// One indexed label.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    pub vector: Vec<f32>,
    /// Events currently filed under this label. Invariant: an event id
    /// appears in at most one entry across the whole index.
    pub event_ids: BTreeSet<Uuid>,
}

/// Label-keyed vector index with k-NN lookup over cosine similarity.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<String, EmbeddingEntry>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Embed a text label through the underlying embedder.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedder.embed(text).await
    }

    /// Replace (or create) an entry wholesale.
    pub async fn upsert(&self, label: &str, vector: Vec<f32>, event_ids: BTreeSet<Uuid>) {
        let mut entries = self.entries.write().await;
        entries.insert(label.to_string(), EmbeddingEntry { vector, event_ids });
    }

    /// Fetch a copy of an entry.
    pub async fn get(&self, label: &str) -> Option<EmbeddingEntry> {
        self.entries.read().await.get(label).cloned()
    }

    /// Remove a label entirely.
    pub async fn delete(&self, label: &str) {
        self.entries.write().await.remove(label);
    }

    /// The `k` labels nearest to `vector`, closest first, as
    /// `(label, distance)` with distance = 1 − cosine similarity.
    pub async fn nearest(&self, vector: &[f32], k: usize) -> Vec<(String, f32)> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .map(|(label, entry)| (label.clone(), 1.0 - cosine(vector, &entry.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// File an event id under a label, embedding the label if it is new.
    ///
    /// The embedder call runs outside the lock; the id insertion happens
    /// in one write-guard critical section so a concurrent attach or
    /// detach on the same label can never be clobbered. Two tasks racing
    /// to create the same label both embed it; the first vector wins.
    pub async fn attach(&self, label: &str, id: Uuid) -> Result<(), EmbeddingError> {
        let known_vector = {
            let entries = self.entries.read().await;
            entries.get(label).map(|e| e.vector.clone())
        };
        let vector = match known_vector {
            Some(v) => v,
            None => self.embed(label).await?,
        };

        let mut entries = self.entries.write().await;
        entries
            .entry(label.to_string())
            .or_insert_with(|| EmbeddingEntry {
                vector,
                event_ids: BTreeSet::new(),
            })
            .event_ids
            .insert(id);
        Ok(())
    }

    /// Remove an event id from a label, dropping the entry once empty.
    pub async fn detach(&self, label: &str, id: Uuid) {
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(label) {
            Some(entry) => {
                entry.event_ids.remove(&id);
                entry.event_ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            entries.remove(label);
        }
    }

    /// Rebuild the index from stored events, embedding each distinct
    /// title once. Called at run start; the index is otherwise empty.
    pub async fn reindex(&self, events: &[StoredEvent]) -> Result<(), EmbeddingError> {
        let mut by_title: HashMap<&str, BTreeSet<Uuid>> = HashMap::new();
        for event in events {
            by_title.entry(&event.title).or_default().insert(event.id);
        }

        let mut entries = HashMap::with_capacity(by_title.len());
        for (title, ids) in by_title {
            let vector = self.embed(title).await?;
            entries.insert(title.to_string(), EmbeddingEntry { vector, event_ids: ids });
        }

        let count = entries.len();
        *self.entries.write().await = entries;
        debug!(labels = count, "Embedding index rebuilt");
        Ok(())
    }

    /// Number of labels in the index.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::embedder::HashEmbedder;
    use chrono::Utc;

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::new(Arc::new(HashEmbedder::new()))
    }

    fn event(title: &str) -> StoredEvent {
        StoredEvent {
            id: Uuid::new_v4(),
            title: title.to_string(),
            starts_at: Utc::now(),
            location: "unknown".to_string(),
            organizer: None,
            duration_minutes: None,
            anchor_id: "<root@x>".to_string(),
            source: "test".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn attach_creates_entry_and_accumulates_ids() {
        let index = index();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.attach("guest lecture", a).await.unwrap();
        index.attach("guest lecture", b).await.unwrap();

        let entry = index.get("guest lecture").await.unwrap();
        assert_eq!(entry.event_ids, BTreeSet::from([a, b]));
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn detach_removes_id_and_drops_empty_entry() {
        let index = index();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.attach("guest lecture", a).await.unwrap();
        index.attach("guest lecture", b).await.unwrap();

        index.detach("guest lecture", a).await;
        let entry = index.get("guest lecture").await.unwrap();
        assert_eq!(entry.event_ids, BTreeSet::from([b]));

        index.detach("guest lecture", b).await;
        assert!(index.get("guest lecture").await.is_none());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn nearest_orders_by_similarity() {
        let index = index();
        index.attach("guest lecture", Uuid::new_v4()).await.unwrap();
        index.attach("spring picnic", Uuid::new_v4()).await.unwrap();

        let query = index.embed("guest lecture series").await.unwrap();
        let neighbors = index.nearest(&query, 2).await;
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].0, "guest lecture");
        assert!(neighbors[0].1 <= neighbors[1].1);
    }

    #[tokio::test]
    async fn nearest_truncates_to_k() {
        let index = index();
        for title in ["a b", "c d", "e f", "g h"] {
            index.attach(title, Uuid::new_v4()).await.unwrap();
        }
        let query = index.embed("a b").await.unwrap();
        assert_eq!(index.nearest(&query, 3).await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attaches_to_one_label_lose_nothing() {
        let index = Arc::new(index());
        let ids: Vec<Uuid> = (0..200).map(|_| Uuid::new_v4()).collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let index = Arc::clone(&index);
                tokio::spawn(async move { index.attach("guest lecture", id).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let entry = index.get("guest lecture").await.unwrap();
        assert_eq!(entry.event_ids.len(), ids.len());
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_detaches_empty_the_label() {
        let index = Arc::new(index());
        let ids: Vec<Uuid> = (0..64).map(|_| Uuid::new_v4()).collect();
        for &id in &ids {
            index.attach("guest lecture", id).await.unwrap();
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let index = Arc::clone(&index);
                tokio::spawn(async move { index.detach("guest lecture", id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(index.get("guest lecture").await.is_none());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn reindex_groups_events_by_title() {
        let index = index();
        let a = event("guest lecture");
        let b = event("guest lecture");
        let c = event("spring picnic");

        index.reindex(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

        assert_eq!(index.len().await, 2);
        let entry = index.get("guest lecture").await.unwrap();
        assert_eq!(entry.event_ids, BTreeSet::from([a.id, b.id]));
        let entry = index.get("spring picnic").await.unwrap();
        assert_eq!(entry.event_ids, BTreeSet::from([c.id]));
    }

    #[tokio::test]
    async fn reindex_replaces_previous_contents() {
        let index = index();
        index.attach("stale label", Uuid::new_v4()).await.unwrap();
        index.reindex(&[event("fresh label")]).await.unwrap();

        assert!(index.get("stale label").await.is_none());
        assert!(index.get("fresh label").await.is_some());
    }
}

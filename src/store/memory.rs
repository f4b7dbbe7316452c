//! In-memory `Store` — backs unit and integration tests that do not
//! need SQL, and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::traits::{MessageStatus, Store, StoredEvent, StoredMessage};

#[derive(Default)]
struct Inner {
    messages: HashMap<String, StoredMessage>,
    events: HashMap<Uuid, StoredEvent>,
    ignored: HashMap<String, HashSet<u32>>,
}

/// Hash-map store guarded by a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events. Test helper.
    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .entry(message.message_id.clone())
            .or_insert_with(|| message.clone());
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.inner.lock().unwrap().messages.get(message_id).cloned())
    }

    async fn set_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.messages.get_mut(message_id) {
            message.status = status;
        }
        Ok(())
    }

    async fn processed_uids(&self, version: u32) -> Result<HashSet<u32>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Processed { version })
            .map(|m| m.uid)
            .collect())
    }

    async fn insert_event(&self, event: &StoredEvent) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .events
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError> {
        Ok(self.inner.lock().unwrap().events.get(&id).cloned())
    }

    async fn update_event(&self, event: &StoredEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.events.contains_key(&event.id) {
            return Err(StoreError::NotFound {
                entity: "event".into(),
                id: event.id.to_string(),
            });
        }
        inner.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().unwrap().events.remove(&id);
        Ok(())
    }

    async fn events_by_anchor(&self, anchor_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .events
            .values()
            .filter(|e| e.anchor_id == anchor_id)
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.inner.lock().unwrap().events.values().cloned().collect())
    }

    async fn insert_ignored(
        &self,
        scraper_id: &str,
        uid: u32,
        _received_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .ignored
            .entry(scraper_id.to_string())
            .or_default()
            .insert(uid);
        Ok(())
    }

    async fn ignored_uids(&self, scraper_id: &str) -> Result<HashSet<u32>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .ignored
            .get(scraper_id)
            .cloned()
            .unwrap_or_default())
    }
}

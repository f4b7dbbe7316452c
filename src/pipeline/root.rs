//! Reply-chain root resolution.
//!
//! Walks the in-reply-to chain backward through the store until a
//! message with no parent link is found. The walk is iterative with a
//! visited set and a depth cap, so a malformed cyclic chain degrades to
//! `NotFound` instead of looping.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;

/// Reply chains deeper than this are treated as unresolvable.
const MAX_CHAIN_DEPTH: usize = 64;

/// Result of resolving a message's thread root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootOutcome {
    /// Identity of the thread's canonical anchor message.
    Resolved(String),
    /// Some ancestor was never stored (or the chain is cyclic). The
    /// message stays unprocessed and is retried on a later run.
    NotFound,
}

pub struct RootResolver {
    store: Arc<dyn Store>,
}

impl RootResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the thread root for a message.
    ///
    /// A message without a parent link is its own root. The caller must
    /// have awaited the thread gate on the immediate parent first, so
    /// that an in-flight parent task has already committed its writes.
    pub async fn resolve(
        &self,
        message_id: &str,
        in_reply_to: Option<&str>,
    ) -> Result<RootOutcome, StoreError> {
        let Some(parent_id) = in_reply_to else {
            return Ok(RootOutcome::Resolved(message_id.to_string()));
        };

        let mut visited: HashSet<String> = HashSet::from([message_id.to_string()]);
        let mut current = parent_id.to_string();

        for _ in 0..MAX_CHAIN_DEPTH {
            if !visited.insert(current.clone()) {
                debug!(id = %message_id, at = %current, "Reply chain is cyclic");
                return Ok(RootOutcome::NotFound);
            }

            match self.store.get_message(&current).await? {
                None => {
                    debug!(id = %message_id, missing = %current, "Ancestor not in store");
                    return Ok(RootOutcome::NotFound);
                }
                Some(stored) => match stored.in_reply_to {
                    None => return Ok(RootOutcome::Resolved(current)),
                    Some(next) => current = next,
                },
            }
        }

        debug!(id = %message_id, "Reply chain exceeds depth cap");
        Ok(RootOutcome::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MessageStatus, StoredMessage};
    use chrono::Utc;

    fn message(id: &str, uid: u32, in_reply_to: Option<&str>) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            uid,
            in_reply_to: in_reply_to.map(str::to_string),
            sender_address: "events@campus.edu".to_string(),
            sender_name: None,
            subject: "s".to_string(),
            body: "b".to_string(),
            body_text: "b".to_string(),
            received_at: Utc::now(),
            status: MessageStatus::Unprocessed,
        }
    }

    async fn store_with(messages: &[StoredMessage]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for m in messages {
            store.upsert_message(m).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn message_without_parent_is_its_own_root() {
        let store = store_with(&[]).await;
        let resolver = RootResolver::new(store);
        let outcome = resolver.resolve("<a@x>", None).await.unwrap();
        assert_eq!(outcome, RootOutcome::Resolved("<a@x>".into()));
    }

    #[tokio::test]
    async fn walks_chain_to_root() {
        let store = store_with(&[
            message("<root@x>", 1, None),
            message("<mid@x>", 2, Some("<root@x>")),
        ])
        .await;
        let resolver = RootResolver::new(store);
        let outcome = resolver.resolve("<leaf@x>", Some("<mid@x>")).await.unwrap();
        assert_eq!(outcome, RootOutcome::Resolved("<root@x>".into()));
    }

    #[tokio::test]
    async fn missing_ancestor_is_not_found() {
        let store = store_with(&[message("<mid@x>", 2, Some("<root@x>"))]).await;
        let resolver = RootResolver::new(store);
        let outcome = resolver.resolve("<leaf@x>", Some("<mid@x>")).await.unwrap();
        assert_eq!(outcome, RootOutcome::NotFound);
    }

    #[tokio::test]
    async fn missing_immediate_parent_is_not_found() {
        let store = store_with(&[]).await;
        let resolver = RootResolver::new(store);
        let outcome = resolver.resolve("<leaf@x>", Some("<gone@x>")).await.unwrap();
        assert_eq!(outcome, RootOutcome::NotFound);
    }

    #[tokio::test]
    async fn cyclic_chain_is_not_found() {
        let store = store_with(&[
            message("<a@x>", 1, Some("<b@x>")),
            message("<b@x>", 2, Some("<a@x>")),
        ])
        .await;
        let resolver = RootResolver::new(store);
        let outcome = resolver.resolve("<leaf@x>", Some("<a@x>")).await.unwrap();
        assert_eq!(outcome, RootOutcome::NotFound);
    }

    #[tokio::test]
    async fn over_deep_chain_is_not_found() {
        let mut messages = vec![message("<m0@x>", 0, None)];
        for i in 1..100 {
            messages.push(message(
                &format!("<m{i}@x>"),
                i,
                Some(&format!("<m{}@x>", i - 1)),
            ));
        }
        let store = store_with(&messages).await;
        let resolver = RootResolver::new(store);
        let outcome = resolver
            .resolve("<leaf@x>", Some("<m99@x>"))
            .await
            .unwrap();
        assert_eq!(outcome, RootOutcome::NotFound);
    }
}

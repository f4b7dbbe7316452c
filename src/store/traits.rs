//! Async `Store` trait — durable records for messages, events, and the
//! ignore ledger.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Processing status of a stored message.
///
/// Transitions are forward-only: `Unprocessed` → `Processing` →
/// `Processed`. A `Processed` version older than the current extractor
/// version means the message's event chain is stale and will be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Unprocessed,
    Processing { version: u32 },
    Processed { version: u32 },
}

/// A persisted inbound message. Never deleted.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Globally unique message identity (RFC 822 Message-ID).
    pub message_id: String,
    /// Transport sequence number. A second message claiming the same
    /// identity with a different uid is malformed.
    pub uid: u32,
    /// Identity of the message this one replies to, if any.
    pub in_reply_to: Option<String>,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    /// Raw body as received.
    pub body: String,
    /// Derived plain text used for classification and extraction.
    pub body_text: String,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
}

/// An extracted event record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub title: String,
    /// Canonical start time. All-day events are encoded as midnight.
    pub starts_at: DateTime<Utc>,
    /// Location string; the literal `"unknown"` is a wildcard.
    pub location: String,
    pub organizer: Option<String>,
    pub duration_minutes: Option<u32>,
    /// Identity of the owning message — always the resolved thread root.
    pub anchor_id: String,
    /// Source tag, e.g. the scraper identity.
    pub source: String,
    /// Supporting text from the originating email.
    pub notes: Option<String>,
}

/// Backend-agnostic persistence trait.
///
/// Each call is atomic on its own; the pipeline never wraps multiple
/// calls in a transaction and tolerates partial failure by re-deriving
/// events on the next run.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message if its identity is not yet stored. No-op on
    /// conflict; the stored record is never overwritten by this call.
    async fn upsert_message(&self, message: &StoredMessage) -> Result<(), StoreError>;

    /// Look up a message by identity.
    async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError>;

    /// Update a message's processing status.
    async fn set_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    /// Uids of messages already processed at the given extractor version.
    /// Used to skip fetching them again.
    async fn processed_uids(&self, version: u32) -> Result<HashSet<u32>, StoreError>;

    // ── Events ──────────────────────────────────────────────────────

    async fn insert_event(&self, event: &StoredEvent) -> Result<(), StoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError>;

    /// Overwrite an event's data in place. The id must already exist.
    async fn update_event(&self, event: &StoredEvent) -> Result<(), StoreError>;

    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError>;

    /// All events anchored to the given root message.
    async fn events_by_anchor(&self, anchor_id: &str) -> Result<Vec<StoredEvent>, StoreError>;

    /// Every stored event. Used to rebuild the embedding index at run start.
    async fn all_events(&self) -> Result<Vec<StoredEvent>, StoreError>;

    // ── Ignore ledger ───────────────────────────────────────────────

    /// Record a permanent tombstone for `(scraper_id, uid)`. Idempotent:
    /// a conflicting insert is a no-op.
    async fn insert_ignored(
        &self,
        scraper_id: &str,
        uid: u32,
        received_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All tombstoned uids for a scraper identity.
    async fn ignored_uids(&self, scraper_id: &str) -> Result<HashSet<u32>, StoreError>;
}

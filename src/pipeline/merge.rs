//! Event merge engine.
//!
//! A candidate event is checked against its nearest neighbors in the
//! embedding index. The first stored event that passes the date and
//! location compatibility tests decides the outcome by received-time
//! tie-break: the event owned by the earlier-received message wins.
//! Only `Inserted` and `Superseded` touch the store or the index.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::embedding::EmbeddingIndex;
use crate::error::Error;
use crate::pipeline::types::CandidateEvent;
use crate::store::{Store, StoredEvent};

/// Location value that matches anything.
const LOCATION_WILDCARD: &str = "unknown";

/// Outcome of merging one candidate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// No mergeable predecessor; a new event was created.
    Inserted(Uuid),
    /// A mergeable predecessor from an earlier-or-equal received message
    /// exists; the candidate was dropped. No writes.
    KeptExisting(Uuid),
    /// A mergeable predecessor from a later-received message was
    /// overwritten in place with the candidate's data (same record id).
    Superseded(Uuid),
}

pub struct MergeEngine {
    store: Arc<dyn Store>,
    index: Arc<EmbeddingIndex>,
    neighbor_k: usize,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn Store>, index: Arc<EmbeddingIndex>, neighbor_k: usize) -> Self {
        Self { store, index, neighbor_k }
    }

    /// Merge a candidate into the stored events, or insert it.
    ///
    /// `anchor_id` is the resolved thread root owning the candidate and
    /// `anchor_received` that root message's received time, used for the
    /// tie-break against each neighbor's owning message.
    pub async fn merge_or_insert(
        &self,
        candidate: &CandidateEvent,
        anchor_id: &str,
        anchor_received: DateTime<Utc>,
        source: &str,
    ) -> Result<MergeDecision, Error> {
        let vector = self.index.embed(&candidate.title).await?;

        for (label, distance) in self.index.nearest(&vector, self.neighbor_k).await {
            let Some(entry) = self.index.get(&label).await else {
                continue;
            };
            for event_id in entry.event_ids {
                let Some(stored) = self.store.get_event(event_id).await? else {
                    continue;
                };
                let Some(owner) = self.store.get_message(&stored.anchor_id).await? else {
                    continue;
                };

                if !dates_compatible(candidate.starts_at, stored.starts_at)
                    || !locations_compatible(&candidate.location, &stored.location)
                {
                    continue;
                }

                if owner.received_at <= anchor_received {
                    debug!(
                        title = %candidate.title,
                        existing = %stored.id,
                        distance,
                        "Candidate merged into earlier event"
                    );
                    return Ok(MergeDecision::KeptExisting(stored.id));
                }

                // The stored event belongs to a later message: overwrite
                // it in place and re-file it under the candidate's title.
                let updated = to_stored(candidate, stored.id, anchor_id, source);
                self.store.update_event(&updated).await?;
                self.index.detach(&stored.title, stored.id).await;
                self.index.attach(&candidate.title, stored.id).await?;
                debug!(
                    title = %candidate.title,
                    superseded = %stored.id,
                    "Later event superseded by candidate"
                );
                return Ok(MergeDecision::Superseded(stored.id));
            }
        }

        let event = to_stored(candidate, Uuid::new_v4(), anchor_id, source);
        self.store.insert_event(&event).await?;
        self.index.attach(&event.title, event.id).await?;
        debug!(title = %event.title, id = %event.id, "New event inserted");
        Ok(MergeDecision::Inserted(event.id))
    }
}

fn to_stored(candidate: &CandidateEvent, id: Uuid, anchor_id: &str, source: &str) -> StoredEvent {
    StoredEvent {
        id,
        title: candidate.title.clone(),
        starts_at: candidate.starts_at,
        location: candidate.location.clone(),
        organizer: candidate.organizer.clone(),
        duration_minutes: candidate.duration_minutes,
        anchor_id: anchor_id.to_string(),
        source: source.to_string(),
        notes: candidate.notes.clone(),
    }
}

/// All-day events are encoded as midnight.
fn is_all_day(ts: DateTime<Utc>) -> bool {
    ts.hour() == 0 && ts.minute() == 0 && ts.second() == 0
}

/// Two timestamps are compatible when exactly equal, or when at least
/// one is an all-day marker and both fall on the same day of the week.
fn dates_compatible(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    if a == b {
        return true;
    }
    (is_all_day(a) || is_all_day(b)) && a.weekday() == b.weekday()
}

/// Two locations are compatible when either is the wildcard, or one is a
/// case-insensitive substring of the other.
fn locations_compatible(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == LOCATION_WILDCARD || b == LOCATION_WILDCARD {
        return true;
    }
    a.contains(&b) || b.contains(&a)
}

//! Pipeline driver.
//!
//! One run: rebuild the embedding index, list candidate uids, fetch and
//! parse the new ones, then process every message as its own task.
//! Construction is sequential in ascending received-time order so a
//! reply's task always finds its parent's gate handle; execution is
//! concurrent, with the gate as the only cross-task ordering point.
//!
//! Per-message state machine:
//!   validate fields → identity/uid conflict check → classify →
//!   await parent gate → resolve root → upsert message →
//!   root-version check → invalidate stale anchored events →
//!   extract → merge candidates → mark processed

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::embedding::EmbeddingIndex;
use crate::error::{Error, OracleError};
use crate::mailbox::{Mailbox, parse_email};
use crate::oracle::{Extraction, ExtractionOracle};
use crate::pipeline::gate::{TaskGuard, ThreadGate};
use crate::pipeline::merge::MergeEngine;
use crate::pipeline::root::{RootOutcome, RootResolver};
use crate::pipeline::types::{Outcome, ParsedEmail, RunSummary};
use crate::store::{MessageStatus, Store, StoredMessage};

pub struct Pipeline {
    mailbox: Arc<dyn Mailbox>,
    store: Arc<dyn Store>,
    oracle: Arc<dyn ExtractionOracle>,
    index: Arc<EmbeddingIndex>,
    scraper_id: String,
    lookback_days: i64,
    neighbor_k: usize,
}

/// Shared per-run state handed to every message task.
struct RunContext {
    store: Arc<dyn Store>,
    oracle: Arc<dyn ExtractionOracle>,
    index: Arc<EmbeddingIndex>,
    classifier: Classifier,
    resolver: RootResolver,
    merge: MergeEngine,
    gate: ThreadGate,
    scraper_id: String,
}

impl Pipeline {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        store: Arc<dyn Store>,
        oracle: Arc<dyn ExtractionOracle>,
        index: Arc<EmbeddingIndex>,
        scraper_id: impl Into<String>,
        lookback_days: i64,
        neighbor_k: usize,
    ) -> Self {
        Self {
            mailbox,
            store,
            oracle,
            index,
            scraper_id: scraper_id.into(),
            lookback_days,
            neighbor_k,
        }
    }

    /// Execute one full pipeline run and return the outcome tally.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let version = self.oracle.version();
        info!(scraper = %self.scraper_id, version, "Pipeline run starting");

        // The index holds no state between runs; rebuild it from the store.
        let events = self.store.all_events().await?;
        self.index.reindex(&events).await?;

        let since = Utc::now() - Duration::days(self.lookback_days);
        let uids = self.mailbox.list_candidate_uids(since).await?;
        let ignored = self.store.ignored_uids(&self.scraper_id).await?;
        let processed = self.store.processed_uids(version).await?;

        let mut summary = RunSummary::default();
        let mut emails: Vec<ParsedEmail> = Vec::new();
        for uid in uids {
            if ignored.contains(&uid) || processed.contains(&uid) {
                continue;
            }
            let raw = match self.mailbox.fetch_raw(uid).await {
                Ok(raw) => raw,
                Err(e) => {
                    // Transport hiccup: the uid stays a candidate next run.
                    warn!(uid, error = %e, "Fetch failed, skipping");
                    continue;
                }
            };
            match parse_email(uid, &raw) {
                Ok(email) => emails.push(email),
                Err(e) => {
                    warn!(uid, error = %e, "Unparseable message, tombstoning");
                    self.store
                        .insert_ignored(&self.scraper_id, uid, Utc::now())
                        .await?;
                    summary.record(&Outcome::Malformed);
                }
            }
        }

        // Sequential construction phase, ascending received time. Gate
        // registration happens here, before any task runs, so a child
        // constructed after its parent is guaranteed to find the handle.
        emails.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.uid.cmp(&b.uid)));

        let ctx = Arc::new(RunContext {
            store: Arc::clone(&self.store),
            oracle: Arc::clone(&self.oracle),
            index: Arc::clone(&self.index),
            classifier: Classifier::new(),
            resolver: RootResolver::new(Arc::clone(&self.store)),
            merge: MergeEngine::new(
                Arc::clone(&self.store),
                Arc::clone(&self.index),
                self.neighbor_k,
            ),
            gate: ThreadGate::new(),
            scraper_id: self.scraper_id.clone(),
        });

        let mut handles = Vec::with_capacity(emails.len());
        for email in emails {
            let Some(message_id) = email.message_id.clone() else {
                // No identity to register under; terminal right here.
                self.store
                    .insert_ignored(&self.scraper_id, email.uid, email.received_at)
                    .await?;
                summary.record(&Outcome::Malformed);
                continue;
            };
            // Only wait on a parent registered before this task. A real
            // parent always predates its reply and is constructed first;
            // a self-reference or in-run reply cycle is not, so those
            // tasks skip the gate and defer through root resolution
            // instead of deadlocking on each other.
            let wait_for_parent = email
                .in_reply_to
                .as_deref()
                .is_some_and(|p| p != message_id && ctx.gate.is_registered(p));
            let guard = ctx.gate.register(&message_id);
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                process_message(&ctx, &message_id, email, wait_for_parent, guard).await
            }));
        }

        for handle in join_all(handles).await {
            match handle {
                Ok(Ok(outcome)) => summary.record(&outcome),
                // Store or index failure: the message stays unprocessed
                // and is retried next run. Sibling tasks are unaffected.
                Ok(Err(e)) => {
                    error!(error = %e, "Message task failed");
                    summary.record_error();
                }
                Err(e) => {
                    error!(error = %e, "Message task panicked");
                    summary.record_error();
                }
            }
        }

        info!(
            total = summary.total,
            processed = summary.processed,
            events = summary.events,
            ignored = summary.ignored_not_relevant,
            malformed = summary.malformed,
            deferred = summary.root_not_found,
            errors = summary.errors,
            "Pipeline run finished"
        );
        Ok(summary)
    }
}

/// Run one message through the state machine to a terminal or deferred
/// outcome. The gate guard resolves on every exit path, including `?`.
async fn process_message(
    ctx: &RunContext,
    message_id: &str,
    email: ParsedEmail,
    wait_for_parent: bool,
    _guard: TaskGuard,
) -> Result<Outcome, Error> {
    let version = ctx.oracle.version();

    let (Some(sender_address), Some(subject)) = (&email.sender_address, &email.subject) else {
        debug!(id = %message_id, "Missing required headers");
        tombstone(ctx, &email).await?;
        return Ok(Outcome::Malformed);
    };
    if email.body_text.trim().is_empty() {
        debug!(id = %message_id, "Empty body");
        tombstone(ctx, &email).await?;
        return Ok(Outcome::Malformed);
    }

    // A second message claiming a stored identity under a different uid
    // is structurally broken, not a refetch.
    if let Some(prior) = ctx.store.get_message(message_id).await?
        && prior.uid != email.uid
    {
        warn!(id = %message_id, prior = prior.uid, uid = email.uid, "Identity/uid conflict");
        tombstone(ctx, &email).await?;
        return Ok(Outcome::Malformed);
    }

    if !ctx.classifier.is_relevant(&email.body_text) {
        tombstone(ctx, &email).await?;
        return Ok(Outcome::IgnoredNotRelevant);
    }

    // Wait for the parent's pipeline to reach a terminal state before
    // reading or writing anything thread-related.
    if wait_for_parent {
        if let Some(parent) = &email.in_reply_to {
            ctx.gate.wait_for(parent).await;
        }
    }

    let root = match ctx.resolver.resolve(message_id, email.in_reply_to.as_deref()).await? {
        RootOutcome::Resolved(root) => root,
        RootOutcome::NotFound => {
            debug!(id = %message_id, "Thread root unresolved, deferring");
            return Ok(Outcome::RootNotFound);
        }
    };

    ctx.store
        .upsert_message(&to_stored(&email, message_id, sender_address, subject))
        .await?;

    let root_record = ctx.store.get_message(&root).await?;
    let anchor_received = root_record
        .as_ref()
        .map_or(email.received_at, |m| m.received_at);
    if let Some(record) = &root_record
        && record.status == (MessageStatus::Processed { version })
    {
        ctx.store
            .set_message_status(message_id, MessageStatus::Processed { version })
            .await?;
        return Ok(Outcome::AlreadyProcessedSameVersion);
    }

    ctx.store
        .set_message_status(message_id, MessageStatus::Processing { version })
        .await?;

    // Stale events anchored to this root (older extractor version, or a
    // partially failed earlier run) are invalidated before re-deriving.
    for stale in ctx.store.events_by_anchor(&root).await? {
        ctx.store.delete_event(stale.id).await?;
        ctx.index.detach(&stale.title, stale.id).await;
    }

    let extraction = match ctx
        .oracle
        .extract(subject, &email.body_text, email.received_at)
        .await
    {
        Ok(extraction) => extraction,
        Err(e) => {
            warn!(id = %message_id, error = %e, "Oracle call failed");
            return Ok(match e {
                OracleError::Network(_) => Outcome::ExtractionTransientError,
                OracleError::MalformedResponse(_) => Outcome::ExtractionMalformedResponse,
            });
        }
    };

    match extraction {
        Extraction::Rejected(level) => {
            ctx.store
                .set_message_status(message_id, MessageStatus::Processed { version })
                .await?;
            Ok(Outcome::ExtractionRejected(level))
        }
        Extraction::Events(candidates) => {
            let count = candidates.len();
            for candidate in &candidates {
                ctx.merge
                    .merge_or_insert(candidate, &root, anchor_received, &ctx.scraper_id)
                    .await?;
            }
            ctx.store
                .set_message_status(message_id, MessageStatus::Processed { version })
                .await?;
            debug!(id = %message_id, events = count, "Message processed");
            Ok(Outcome::ProcessedWithEvents(count))
        }
    }
}

async fn tombstone(ctx: &RunContext, email: &ParsedEmail) -> Result<(), Error> {
    ctx.store
        .insert_ignored(&ctx.scraper_id, email.uid, email.received_at)
        .await?;
    Ok(())
}

fn to_stored(
    email: &ParsedEmail,
    message_id: &str,
    sender_address: &str,
    subject: &str,
) -> StoredMessage {
    StoredMessage {
        message_id: message_id.to_string(),
        uid: email.uid,
        in_reply_to: email.in_reply_to.clone(),
        sender_address: sender_address.to_string(),
        sender_name: email.sender_name.clone(),
        subject: subject.to_string(),
        body: email.body.clone(),
        body_text: email.body_text.clone(),
        received_at: email.received_at,
        status: MessageStatus::Unprocessed,
    }
}

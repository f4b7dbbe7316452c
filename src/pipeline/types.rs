//! Shared types for the extraction pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound email after transport fetch and MIME parsing, before
/// validation. Optional fields are enforced by the driver; a missing
/// required field terminates the message as malformed.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Transport sequence number within the mailbox.
    pub uid: u32,
    /// RFC 822 Message-ID, if present.
    pub message_id: Option<String>,
    /// Message-ID of the message this one replies to, if any.
    pub in_reply_to: Option<String>,
    pub sender_address: Option<String>,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    /// Raw body as received.
    pub body: String,
    /// Derived plain text (HTML-only bodies arrive converted to text).
    pub body_text: String,
    pub received_at: DateTime<Utc>,
}

/// A candidate event produced by the extraction oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub title: String,
    /// Canonical start time. All-day events are encoded as midnight.
    pub starts_at: DateTime<Utc>,
    /// Location string; `"unknown"` is a wildcard.
    pub location: String,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Confidence level of an oracle rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionLevel {
    /// The oracle is certain the text describes no event.
    Definite,
    /// The oracle could not extract an event with confidence.
    Uncertain,
}

/// Terminal (or deferred) outcome of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Required fields missing or duplicate identity with a different
    /// uid. Tombstoned, never retried.
    Malformed,
    /// Classifier rejected the message. Tombstoned, never retried.
    IgnoredNotRelevant,
    /// The reply chain could not be resolved this run. Left unprocessed;
    /// retried once the parent is ingested.
    RootNotFound,
    /// The oracle said the message describes no event. Marked processed;
    /// retried only after an extractor version bump.
    ExtractionRejected(RejectionLevel),
    /// The oracle call failed in transit. Left unprocessed, retried next run.
    ExtractionTransientError,
    /// The oracle answered but the payload was undecodable. Left
    /// unprocessed, retried next run.
    ExtractionMalformedResponse,
    /// The thread was already extracted at the current version.
    AlreadyProcessedSameVersion,
    /// Extraction and merging completed for this many candidate events.
    ProcessedWithEvents(usize),
}

impl Outcome {
    /// Short label for logging and tallying.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::IgnoredNotRelevant => "ignored_not_relevant",
            Self::RootNotFound => "root_not_found",
            Self::ExtractionRejected(_) => "extraction_rejected",
            Self::ExtractionTransientError => "extraction_transient_error",
            Self::ExtractionMalformedResponse => "extraction_malformed_response",
            Self::AlreadyProcessedSameVersion => "already_processed_same_version",
            Self::ProcessedWithEvents(_) => "processed_with_events",
        }
    }
}

/// Per-run tally of message outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub malformed: usize,
    pub ignored_not_relevant: usize,
    pub root_not_found: usize,
    pub extraction_rejected: usize,
    pub extraction_transient_error: usize,
    pub extraction_malformed_response: usize,
    pub already_processed: usize,
    pub processed: usize,
    /// Tasks that failed on a store or index error before reaching an
    /// outcome. Those messages are left unprocessed and retried next run.
    pub errors: usize,
    /// Total events created or merged across processed messages.
    pub events: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Malformed => self.malformed += 1,
            Outcome::IgnoredNotRelevant => self.ignored_not_relevant += 1,
            Outcome::RootNotFound => self.root_not_found += 1,
            Outcome::ExtractionRejected(_) => self.extraction_rejected += 1,
            Outcome::ExtractionTransientError => self.extraction_transient_error += 1,
            Outcome::ExtractionMalformedResponse => self.extraction_malformed_response += 1,
            Outcome::AlreadyProcessedSameVersion => self.already_processed += 1,
            Outcome::ProcessedWithEvents(n) => {
                self.processed += 1;
                self.events += n;
            }
        }
    }

    /// Count a task that failed before reaching an outcome.
    pub fn record_error(&mut self) {
        self.total += 1;
        self.errors += 1;
    }
}

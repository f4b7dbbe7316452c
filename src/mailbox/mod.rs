//! Mailbox access — candidate listing and raw message fetch.
//!
//! The pipeline only needs two operations from the transport: which
//! uids are worth looking at, and the raw bytes of one message. MIME
//! decoding lives in `parse` so every backend shares it.

mod maildir;
mod parse;

pub use maildir::MaildirMailbox;
pub use parse::parse_email;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MailboxError;

/// Read-only message source.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Uids of messages received at or after `since`, ascending.
    async fn list_candidate_uids(&self, since: DateTime<Utc>)
    -> Result<Vec<u32>, MailboxError>;

    /// Raw RFC 822 bytes of one message.
    async fn fetch_raw(&self, uid: u32) -> Result<Vec<u8>, MailboxError>;
}

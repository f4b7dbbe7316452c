//! Directory-of-`.eml`-files mailbox backend.
//!
//! Each message lives in `<dir>/<uid>.eml` where the file stem is the
//! transport uid. Listing uses the file modification time as a cheap
//! received-time proxy; the authoritative time is the parsed Date
//! header downstream.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::MailboxError;
use crate::mailbox::Mailbox;

pub struct MaildirMailbox {
    dir: PathBuf,
}

impl MaildirMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, uid: u32) -> PathBuf {
        self.dir.join(format!("{uid}.eml"))
    }
}

#[async_trait]
impl Mailbox for MaildirMailbox {
    async fn list_candidate_uids(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<u32>, MailboxError> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| MailboxError::List(e.to_string()))?;

        let mut uids = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MailboxError::List(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("eml") {
                continue;
            }
            let Some(uid) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                warn!(path = %path.display(), "Skipping non-numeric mailbox entry");
                continue;
            };

            let modified: DateTime<Utc> = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map(DateTime::from)
                .map_err(|e| MailboxError::List(e.to_string()))?;
            if modified >= since {
                uids.push(uid);
            }
        }

        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_raw(&self, uid: u32) -> Result<Vec<u8>, MailboxError> {
        tokio::fs::read(self.path_for(uid))
            .await
            .map_err(|e| MailboxError::Fetch {
                uid,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn lists_numeric_eml_files_ascending() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["3.eml", "1.eml", "10.eml", "notes.txt", "x.eml"] {
            std::fs::write(dir.path().join(name), b"From: a@b\r\n\r\nhi\r\n").unwrap();
        }

        let mailbox = MaildirMailbox::new(dir.path());
        let since = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(mailbox.list_candidate_uids(since).await.unwrap(), vec![1, 3, 10]);
    }

    #[tokio::test]
    async fn since_in_the_future_filters_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.eml"), b"From: a@b\r\n\r\nhi\r\n").unwrap();

        let mailbox = MaildirMailbox::new(dir.path());
        let since = Utc::now() + chrono::Duration::days(1);
        assert!(mailbox.list_candidate_uids(since).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_returns_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.eml"), b"raw bytes").unwrap();

        let mailbox = MaildirMailbox::new(dir.path());
        assert_eq!(mailbox.fetch_raw(7).await.unwrap(), b"raw bytes");
    }

    #[tokio::test]
    async fn fetch_missing_uid_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MaildirMailbox::new(dir.path());
        assert!(matches!(
            mailbox.fetch_raw(99).await,
            Err(MailboxError::Fetch { uid: 99, .. })
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_a_list_error() {
        let mailbox = MaildirMailbox::new("/nonexistent/mail");
        assert!(matches!(
            mailbox.list_candidate_uids(Utc::now()).await,
            Err(MailboxError::List(_))
        ));
    }
}

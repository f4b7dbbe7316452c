//! libSQL backend — async `Store` implementation over a local database
//! file (or `:memory:` for tests).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{MessageStatus, Store, StoredEvent, StoredMessage};

/// libSQL store backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("failed to create db directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Store opened");
        Ok(Self { db: Arc::new(db), conn })
    }

    /// Create an in-memory store (for tests).
    pub async fn open_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self { db: Arc::new(db), conn })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into `DateTime<Utc>`.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn status_to_columns(status: &MessageStatus) -> (&'static str, Option<i64>) {
    match status {
        MessageStatus::Unprocessed => ("unprocessed", None),
        MessageStatus::Processing { version } => ("processing", Some(i64::from(*version))),
        MessageStatus::Processed { version } => ("processed", Some(i64::from(*version))),
    }
}

fn columns_to_status(tag: &str, version: Option<i64>) -> MessageStatus {
    let version = version.unwrap_or(0) as u32;
    match tag {
        "processing" => MessageStatus::Processing { version },
        "processed" => MessageStatus::Processed { version },
        _ => MessageStatus::Unprocessed,
    }
}

/// Map a libsql row to a `StoredMessage`.
///
/// Column order: 0:message_id, 1:uid, 2:in_reply_to, 3:sender_address,
/// 4:sender_name, 5:subject, 6:body, 7:body_text, 8:received_at,
/// 9:status, 10:status_version
fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, libsql::Error> {
    let status_tag: String = row.get(9)?;
    let status_version: Option<i64> = row.get(10).ok();
    Ok(StoredMessage {
        message_id: row.get(0)?,
        uid: row.get::<i64>(1)? as u32,
        in_reply_to: row.get(2).ok(),
        sender_address: row.get(3)?,
        sender_name: row.get(4).ok(),
        subject: row.get(5)?,
        body: row.get(6)?,
        body_text: row.get(7)?,
        received_at: parse_datetime(&row.get::<String>(8)?),
        status: columns_to_status(&status_tag, status_version),
    })
}

const MESSAGE_COLUMNS: &str = "message_id, uid, in_reply_to, sender_address, sender_name, \
     subject, body, body_text, received_at, status, status_version";

/// Map a libsql row to a `StoredEvent`.
///
/// Column order: 0:id, 1:title, 2:starts_at, 3:location, 4:organizer,
/// 5:duration_minutes, 6:anchor_id, 7:source, 8:notes
fn row_to_event(row: &libsql::Row) -> Result<StoredEvent, libsql::Error> {
    let id_str: String = row.get(0)?;
    Ok(StoredEvent {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        title: row.get(1)?,
        starts_at: parse_datetime(&row.get::<String>(2)?),
        location: row.get(3)?,
        organizer: row.get(4).ok(),
        duration_minutes: row.get::<i64>(5).ok().map(|d| d as u32),
        anchor_id: row.get(6)?,
        source: row.get(7)?,
        notes: row.get(8).ok(),
    })
}

const EVENT_COLUMNS: &str =
    "id, title, starts_at, location, organizer, duration_minutes, anchor_id, source, notes";

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn upsert_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let (status, status_version) = status_to_columns(&message.status);
        self.conn()
            .execute(
                "INSERT INTO messages (message_id, uid, in_reply_to, sender_address, \
                 sender_name, subject, body, body_text, received_at, status, status_version) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT(message_id) DO NOTHING",
                params![
                    message.message_id.clone(),
                    i64::from(message.uid),
                    message.in_reply_to.clone(),
                    message.sender_address.clone(),
                    message.sender_name.clone(),
                    message.subject.clone(),
                    message.body.clone(),
                    message.body_text.clone(),
                    message.received_at.to_rfc3339(),
                    status,
                    status_version,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn set_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let (tag, version) = status_to_columns(&status);
        self.conn()
            .execute(
                "UPDATE messages SET status = ?1, status_version = ?2, \
                 updated_at = datetime('now') WHERE message_id = ?3",
                params![tag, version, message_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn processed_uids(&self, version: u32) -> Result<HashSet<u32>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT uid FROM messages WHERE status = 'processed' AND status_version = ?1",
                params![i64::from(version)],
            )
            .await
            .map_err(query_err)?;

        let mut uids = HashSet::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            uids.insert(row.get::<i64>(0).map_err(query_err)? as u32);
        }
        Ok(uids)
    }

    async fn insert_event(&self, event: &StoredEvent) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO events (id, title, starts_at, location, organizer, \
                 duration_minutes, anchor_id, source, notes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id.to_string(),
                    event.title.clone(),
                    event.starts_at.to_rfc3339(),
                    event.location.clone(),
                    event.organizer.clone(),
                    event.duration_minutes.map(i64::from),
                    event.anchor_id.clone(),
                    event.source.clone(),
                    event.notes.clone(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_event(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn update_event(&self, event: &StoredEvent) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE events SET title = ?1, starts_at = ?2, location = ?3, \
                 organizer = ?4, duration_minutes = ?5, anchor_id = ?6, source = ?7, \
                 notes = ?8, updated_at = datetime('now') WHERE id = ?9",
                params![
                    event.title.clone(),
                    event.starts_at.to_rfc3339(),
                    event.location.clone(),
                    event.organizer.clone(),
                    event.duration_minutes.map(i64::from),
                    event.anchor_id.clone(),
                    event.source.clone(),
                    event.notes.clone(),
                    event.id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "event".into(),
                id: event.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn events_by_anchor(&self, anchor_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE anchor_id = ?1"),
                params![anchor_id],
            )
            .await
            .map_err(query_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            events.push(row_to_event(&row).map_err(query_err)?);
        }
        Ok(events)
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {EVENT_COLUMNS} FROM events"), ())
            .await
            .map_err(query_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            events.push(row_to_event(&row).map_err(query_err)?);
        }
        Ok(events)
    }

    async fn insert_ignored(
        &self,
        scraper_id: &str,
        uid: u32,
        received_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO ignored_messages (scraper_id, uid, received_at) \
                 VALUES (?1, ?2, ?3) ON CONFLICT(scraper_id, uid) DO NOTHING",
                params![scraper_id, i64::from(uid), received_at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn ignored_uids(&self, scraper_id: &str) -> Result<HashSet<u32>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT uid FROM ignored_messages WHERE scraper_id = ?1",
                params![scraper_id],
            )
            .await
            .map_err(query_err)?;

        let mut uids = HashSet::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            uids.insert(row.get::<i64>(0).map_err(query_err)? as u32);
        }
        Ok(uids)
    }
}

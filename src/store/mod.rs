//! Persistence layer — durable messages, events, and the ignore ledger.

pub mod libsql_backend;
pub mod memory;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::{MessageStatus, Store, StoredEvent, StoredMessage};

//! Error types for eventmail.

/// Top-level error type for the scraper.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail transport/parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to list mailbox: {0}")]
    List(String),

    #[error("Failed to fetch message {uid}: {reason}")]
    Fetch { uid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extraction oracle errors.
///
/// `Network` is transient — the message is left unprocessed and retried
/// next run. `MalformedResponse` means the oracle answered but the payload
/// could not be decoded; also retried next run.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle request failed: {0}")]
    Network(String),

    #[error("Oracle returned an undecodable response: {0}")]
    MalformedResponse(String),
}

/// Embedding/index errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the scraper.
pub type Result<T> = std::result::Result<T, Error>;

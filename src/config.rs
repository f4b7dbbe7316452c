//! Run configuration, read from the environment.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default lookback window for candidate messages, in days.
const DEFAULT_LOOKBACK_DAYS: u32 = 14;

/// Default neighbor count for the merge engine's similarity query.
const DEFAULT_NEIGHBOR_K: usize = 3;

/// Configuration for one scraper run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Scraper identity — namespaces the ignore ledger.
    pub scraper_id: String,
    /// How many days back to consider candidate messages.
    pub lookback_days: u32,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Directory of raw `.eml` files to ingest.
    pub maildir_path: String,
    /// OpenAI API key (chat + embeddings).
    pub api_key: SecretString,
    /// Chat model used by the extraction oracle.
    pub chat_model: String,
    /// Embedding model used by the index.
    pub embedding_model: String,
    /// Neighbor count for the merge engine's k-NN query.
    pub neighbor_k: usize,
}

impl RunConfig {
    /// Build a config from environment variables.
    ///
    /// `OPENAI_API_KEY` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))?;

        let lookback_days = env_parse("EVENTMAIL_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?;
        let neighbor_k = env_parse("EVENTMAIL_NEIGHBOR_K", DEFAULT_NEIGHBOR_K)?;

        Ok(Self {
            scraper_id: std::env::var("EVENTMAIL_SCRAPER_ID")
                .unwrap_or_else(|_| "eventmail".to_string()),
            lookback_days,
            db_path: std::env::var("EVENTMAIL_DB_PATH")
                .unwrap_or_else(|_| "./data/eventmail.db".to_string()),
            maildir_path: std::env::var("EVENTMAIL_MAILDIR")
                .unwrap_or_else(|_| "./mail".to_string()),
            api_key: SecretString::from(api_key),
            chat_model: std::env::var("EVENTMAIL_CHAT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: std::env::var("EVENTMAIL_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            neighbor_k,
        })
    }
}

/// Parse an env var, falling back to `default` when unset.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
    }
}

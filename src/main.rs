use std::sync::Arc;

use eventmail::config::RunConfig;
use eventmail::embedding::{EmbeddingIndex, OpenAiEmbedder};
use eventmail::mailbox::MaildirMailbox;
use eventmail::oracle::LlmOracle;
use eventmail::pipeline::Pipeline;
use eventmail::store::LibSqlStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RunConfig::from_env()?;

    eprintln!("📬 eventmail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Scraper: {}", config.scraper_id);
    eprintln!("   Mailbox: {}", config.maildir_path);
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Models: {} / {}", config.chat_model, config.embedding_model);
    eprintln!("   Lookback: {} days\n", config.lookback_days);

    let store = Arc::new(LibSqlStore::open(std::path::Path::new(&config.db_path)).await?);
    let mailbox = Arc::new(MaildirMailbox::new(&config.maildir_path));
    let oracle = Arc::new(LlmOracle::new(config.api_key.clone(), &config.chat_model));
    let embedder = Arc::new(OpenAiEmbedder::new(
        config.api_key.clone(),
        &config.embedding_model,
    ));
    let index = Arc::new(EmbeddingIndex::new(embedder));

    let pipeline = Pipeline::new(
        mailbox,
        store,
        oracle,
        index,
        &config.scraper_id,
        i64::from(config.lookback_days),
        config.neighbor_k,
    );

    let summary = pipeline.run().await?;

    eprintln!(
        "\nDone: {} messages, {} processed, {} events, {} ignored, {} deferred",
        summary.total,
        summary.processed,
        summary.events,
        summary.ignored_not_relevant + summary.malformed,
        summary.root_not_found + summary.extraction_transient_error
            + summary.extraction_malformed_response,
    );
    Ok(())
}

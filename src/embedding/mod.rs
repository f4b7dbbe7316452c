//! Semantic embeddings — embedder backends and the in-memory label index.

mod embedder;
mod index;

pub use embedder::{Embedder, HashEmbedder, OpenAiEmbedder};
pub use index::{EmbeddingEntry, EmbeddingIndex};

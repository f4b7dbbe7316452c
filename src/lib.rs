//! Eventmail — campus-email event extraction pipeline.

pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod mailbox;
pub mod oracle;
pub mod pipeline;
pub mod store;

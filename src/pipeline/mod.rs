//! The ordering-aware extraction pipeline.

pub mod driver;
pub mod gate;
pub mod merge;
pub mod root;
pub mod types;

pub use driver::Pipeline;
pub use gate::{TaskGuard, ThreadGate};
pub use merge::{MergeDecision, MergeEngine};
pub use root::{RootOutcome, RootResolver};
pub use types::{CandidateEvent, Outcome, ParsedEmail, RejectionLevel, RunSummary};

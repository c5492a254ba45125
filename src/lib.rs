// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod profile;
pub mod ranking;
pub mod run;
pub mod scoring;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::CurationSettings;
pub use crate::error::{CuratorError, Result};
pub use crate::feedback::{FeedbackEvent, FeedbackOutcome, FeedbackRecorder};
pub use crate::ingest::hash_id;
pub use crate::run::{CurationRun, RunOptions, RunOutput};
pub use crate::store::{FileStore, MemoryStore, StateStore};

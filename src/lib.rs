// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod render;
pub mod retry;
pub mod runner;
pub mod state;
pub mod translate;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::ingest::{ContentItem, FetchBatch, RawItem, SourceFetcher};
pub use crate::runner::{CycleSummary, Relay};
pub use crate::state::{CursorStore, Marker, RecencyWindow};

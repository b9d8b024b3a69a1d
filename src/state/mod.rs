//! Durable poll state: per-source cursors and the delivered-id recency window.

pub mod cursor;
pub mod recency;

pub use cursor::{CursorStore, Marker};
pub use recency::RecencyWindow;

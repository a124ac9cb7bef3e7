//! Domain types for notifybridge
//!
//! The canonical [`Record`] shape every event source is mapped into, plus the
//! ordering rules the cache relies on.

mod record;

pub use record::{Record, TIMESTAMP_FORMAT, sort_most_recent_first};

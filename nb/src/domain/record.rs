//! Record domain type
//!
//! A normalized notification entry, ready for serialization onto the wire.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// strftime pattern for record timestamps (microsecond precision, UTC marker)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// A single notification as cached and pushed to clients
///
/// Serializes as `{"type":"notification","timestamp":..,"title":..,"body":..,"app":..}`
/// with absent fields rendered as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename = "notification")]
pub struct Record {
    /// ISO-8601 creation time with fractional seconds and `Z`
    pub timestamp: Option<String>,

    /// First non-blank text line
    pub title: Option<String>,

    /// Second non-blank text line
    pub body: Option<String>,

    /// Display name of the originating application
    pub app: Option<String>,
}

impl Record {
    /// Create a record from its parts
    pub fn new(
        timestamp: Option<String>,
        title: Option<String>,
        body: Option<String>,
        app: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            title,
            body,
            app,
        }
    }

    /// Format a creation time the way records carry it
    pub fn format_timestamp(at: &DateTime<Utc>) -> String {
        at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Key used for ordering; a missing timestamp compares as the empty string
    pub fn sort_key(&self) -> &str {
        self.timestamp.as_deref().unwrap_or("")
    }

    /// Descending comparison by timestamp
    pub fn cmp_recency(&self, other: &Self) -> Ordering {
        other.sort_key().cmp(self.sort_key())
    }
}

/// Sort records newest first
///
/// Stable, so records sharing a timestamp keep their input order. Untimed
/// records sort last.
pub fn sort_most_recent_first(records: &mut [Record]) {
    records.sort_by(Record::cmp_recency);
}

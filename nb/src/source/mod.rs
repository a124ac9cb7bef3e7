//! Event sources
//!
//! An [`EventSource`] hands out a [`Listener`] that can be asked for access,
//! watched for changes, and listed. Change callbacks arrive on whatever thread
//! the source uses internally, never on the runtime, so callers must treat
//! them as foreign.
//!
//! Two sources ship with the crate:
//!
//! - [`SpoolSource`] - a JSON-lines spool file watched with `notify`
//! - [`MemorySource`] - an in-process source driven by the embedding code

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Record;

pub mod mapper;
mod memory;
mod spool;

pub use mapper::map_event;
pub use memory::MemorySource;
pub use spool::SpoolSource;

/// Raw platform event before mapping
pub type RawEvent = serde_json::Value;

/// Callback invoked whenever the underlying event set may have changed
pub type ChangeCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Errors from event source operations
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Unavailable(String),

    #[error("Failed to list events: {0}")]
    Listing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Outcome of an access request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    Denied,
    Unspecified,
}

impl AccessStatus {
    /// Whether the source granted access
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "ALLOWED"),
            Self::Denied => write!(f, "DENIED"),
            Self::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

/// Live handle onto an event source
#[async_trait]
pub trait Listener: Send + Sync {
    /// Ask for permission to read events
    async fn request_access(&self) -> Result<AccessStatus, SourceError>;

    /// Register a callback fired from an unspecified thread on every change
    fn register_change_callback(&self, callback: ChangeCallback) -> Result<(), SourceError>;

    /// List the events currently held by the source
    async fn list_current_events(&self) -> Result<Vec<RawEvent>, SourceError>;
}

/// Producer of raw events
pub trait EventSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Resolve a listener, or explain why the source cannot be used at all
    fn acquire_listener(&self) -> Result<Arc<dyn Listener>, SourceError>;

    /// Map a raw event into a record; `None` means "skip this one"
    fn map_event(&self, event: &RawEvent) -> Option<Record> {
        mapper::map_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_status_display() {
        assert_eq!(AccessStatus::Allowed.to_string(), "ALLOWED");
        assert_eq!(AccessStatus::Denied.to_string(), "DENIED");
        assert_eq!(AccessStatus::Unspecified.to_string(), "UNSPECIFIED");
    }

    #[test]
    fn test_only_allowed_is_allowed() {
        assert!(AccessStatus::Allowed.is_allowed());
        assert!(!AccessStatus::Denied.is_allowed());
        assert!(!AccessStatus::Unspecified.is_allowed());
    }

    #[test]
    fn test_unavailable_error_is_bare_reason() {
        let err = SourceError::Unavailable("spool directory missing".to_string());
        assert_eq!(err.to_string(), "spool directory missing");
    }
}

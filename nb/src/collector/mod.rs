//! Notification collection
//!
//! The [`Collector`] owns a bounded [`RecordCache`] and the availability of the
//! event source. Change callbacks from the source are routed through a
//! [`RefreshTrigger`] into a worker task that runs [`Collector::refresh`].

mod cache;
mod core;
mod trigger;

pub use cache::{DEFAULT_CAPACITY, RecordCache};
pub use self::core::{
    Availability, Collector, DEFAULT_ACCESS_DENIED_MESSAGE, DEFAULT_UNAVAILABLE_MESSAGE, ErrorCode, ReadResult,
    SnapshotHook,
};
pub use trigger::{RefreshTrigger, spawn_refresh_worker};

//! NotifyBridge - desktop notification cache with a push bridge
//!
//! NotifyBridge keeps a bounded, newest-first cache of the notifications an
//! event source reports and serves it to local clients over line-delimited
//! JSON on TCP. Clients can read the cache on demand or subscribe and receive
//! a full snapshot after every change.
//!
//! # Modules
//!
//! - [`domain`] - The normalized notification [`Record`]
//! - [`source`] - Event source abstraction, raw event mapping, spool and in-memory sources
//! - [`collector`] - Record cache, availability state and refresh hand-off
//! - [`ipc`] - Wire messages, subscriber hub, server and client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod ipc;
pub mod source;

// Re-export commonly used types
pub use collector::{
    Availability, Collector, ErrorCode, ReadResult, RecordCache, RefreshTrigger, SnapshotHook, spawn_refresh_worker,
};
pub use config::Config;
pub use domain::Record;
pub use ipc::{BridgeClient, IpcServer, PushFrame, SubscriberHub, WatchEvent};
pub use source::{AccessStatus, EventSource, Listener, MemorySource, SourceError, SpoolSource};

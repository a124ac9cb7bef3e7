//! Collector - owns the record cache and the source's availability

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::cache::RecordCache;
use super::trigger::RefreshTrigger;
use crate::domain::Record;
use crate::source::{EventSource, Listener, SourceError};

/// Message used when the source never became usable and no reason was recorded
pub const DEFAULT_UNAVAILABLE_MESSAGE: &str = "Notification source is unavailable.";

/// Message used when access was refused and no reason was recorded
pub const DEFAULT_ACCESS_DENIED_MESSAGE: &str = "Notification access denied.";

/// Startup progress of the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    #[default]
    NotStarted,
    Starting,
    /// The listener could not be acquired or wired up
    Unavailable,
    /// The source answered but refused access
    AccessDenied,
    /// The cache is authoritative
    Ready,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::AccessDenied => write!(f, "access_denied"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Error codes carried in failed responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ApiUnavailable,
    AccessDenied,
    ReadFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiUnavailable => write!(f, "API_UNAVAILABLE"),
            Self::AccessDenied => write!(f, "ACCESS_DENIED"),
            Self::ReadFailed => write!(f, "READ_FAILED"),
        }
    }
}

/// Result of a point-in-time read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub ok: bool,
    pub error_code: Option<ErrorCode>,
    pub message: Option<String>,
    #[serde(default)]
    pub notifications: Vec<Record>,
}

impl ReadResult {
    /// Successful read carrying a snapshot
    pub fn success(notifications: Vec<Record>) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: None,
            notifications,
        }
    }

    /// Failed read with no notifications
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code),
            message: Some(message.into()),
            notifications: Vec::new(),
        }
    }
}

/// Receives each snapshot produced by a refresh
///
/// `refresh` awaits the hook before returning, so a pushed snapshot is never
/// observed out of order with the cache it came from.
#[async_trait]
pub trait SnapshotHook: Send + Sync {
    async fn on_snapshot(&self, records: &[Record]);
}

#[derive(Debug, Default)]
struct SourceStatus {
    availability: Availability,
    last_error: Option<String>,
}

/// Owns the record cache and pulls from the event source on demand
pub struct Collector {
    source: Arc<dyn EventSource>,
    cache: RecordCache,
    status: Mutex<SourceStatus>,
    started: AtomicBool,
    listener: OnceLock<Arc<dyn Listener>>,
    hook: RwLock<Option<Arc<dyn SnapshotHook>>>,
    /// Serializes refreshes so fan-outs never interleave
    refresh_gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("source", &self.source.name())
            .field("cache", &self.cache)
            .field("status", &self.status)
            .finish()
    }
}

impl Collector {
    /// Create a collector over `source` keeping at most `capacity` records
    pub fn new(source: Arc<dyn EventSource>, capacity: usize) -> Self {
        debug!(source = source.name(), capacity, "Collector::new: called");
        Self {
            source,
            cache: RecordCache::new(capacity),
            status: Mutex::new(SourceStatus::default()),
            started: AtomicBool::new(false),
            listener: OnceLock::new(),
            hook: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn status(&self) -> MutexGuard<'_, SourceStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, availability: Availability, last_error: Option<String>) {
        let mut status = self.status();
        status.availability = availability;
        status.last_error = last_error;
    }

    fn mark_unavailable(&self, reason: String) {
        error!(source = self.source.name(), %reason, "Notification source unavailable");
        self.set_status(Availability::Unavailable, Some(reason));
    }

    /// Install the hook invoked after every successful refresh
    pub fn set_snapshot_hook(&self, hook: Arc<dyn SnapshotHook>) {
        *self.hook.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Current startup state
    pub fn availability(&self) -> Availability {
        self.status().availability
    }

    /// Reason for the current non-ready state, if any
    pub fn last_error(&self) -> Option<String> {
        self.status().last_error.clone()
    }

    /// Access to the underlying cache
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Connect to the source
    ///
    /// Only the first call does anything. On success the collector is
    /// `Ready`, change callbacks fire `trigger`, and one refresh has run.
    pub async fn start(&self, trigger: RefreshTrigger) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Collector::start: already started");
            return;
        }
        info!(source = self.source.name(), "Starting notification collector");
        self.set_status(Availability::Starting, None);

        let listener = match self.source.acquire_listener() {
            Ok(listener) => listener,
            Err(e) => {
                self.mark_unavailable(e.to_string());
                return;
            }
        };

        match listener.request_access().await {
            Ok(status) if status.is_allowed() => {
                debug!("Collector::start: access granted");
            }
            Ok(status) => {
                let reason = format!("Notification access status is {}.", status);
                warn!("{}", reason);
                self.set_status(Availability::AccessDenied, Some(reason));
                return;
            }
            Err(e) => {
                self.mark_unavailable(format!("Access request failed: {}", e));
                return;
            }
        }

        if let Err(e) = listener.register_change_callback(Box::new(move || trigger.fire())) {
            self.mark_unavailable(format!("Failed to register change callback: {}", e));
            return;
        }

        if self.listener.set(listener).is_err() {
            warn!("Collector::start: listener already installed");
        }
        self.set_status(Availability::Ready, None);

        self.refresh().await;
        info!(cached = self.cache.len(), "Notification collector ready");
    }

    /// Pull the current events and replace the cache
    ///
    /// A failed listing is logged and leaves the cache and availability as they
    /// were. Unmappable events are dropped individually.
    pub async fn refresh(&self) {
        let Some(listener) = self.listener.get() else {
            debug!("Collector::refresh: no listener, skipping");
            return;
        };

        let _gate = self.refresh_gate.lock().await;
        let records = match self.collect(listener.as_ref()).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to refresh notification snapshot");
                return;
            }
        };

        let snapshot = self.cache.replace(records);
        debug!(cached = snapshot.len(), "Collector::refresh: cache replaced");

        let hook = self.hook.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook.on_snapshot(&snapshot).await;
        }
    }

    async fn collect(&self, listener: &dyn Listener) -> Result<Vec<Record>, SourceError> {
        let raw = listener.list_current_events().await?;
        let total = raw.len();
        let records: Vec<Record> = raw.iter().filter_map(|event| self.source.map_event(event)).collect();
        if records.len() < total {
            warn!(dropped = total - records.len(), total, "Dropped unmappable notifications");
        }
        Ok(records)
    }

    /// Current cache contents in cache order
    pub fn snapshot(&self) -> Vec<Record> {
        let shared = self.cache.snapshot();
        shared.as_ref().clone()
    }

    /// Point-in-time read shaped by availability
    pub fn read(&self) -> ReadResult {
        let (availability, last_error) = {
            let status = self.status();
            (status.availability, status.last_error.clone())
        };

        match availability {
            Availability::Ready => ReadResult::success(self.snapshot()),
            Availability::AccessDenied => ReadResult::failure(
                ErrorCode::AccessDenied,
                last_error.unwrap_or_else(|| DEFAULT_ACCESS_DENIED_MESSAGE.to_string()),
            ),
            Availability::NotStarted | Availability::Starting | Availability::Unavailable => ReadResult::failure(
                ErrorCode::ApiUnavailable,
                last_error.unwrap_or_else(|| DEFAULT_UNAVAILABLE_MESSAGE.to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AccessStatus, MemorySource};
    use serde_json::{Value, json};
    use tokio::sync::Mutex as AsyncMutex;

    fn toast(ts: &str, title: &str) -> Value {
        json!({
            "creationTime": ts,
            "notification": { "visual": { "bindings": [ { "textElements": [ { "text": title } ] } ] } }
        })
    }

    fn titles(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(|r| r.title.clone()).collect()
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: AsyncMutex<Vec<Vec<Record>>>,
    }

    #[async_trait]
    impl SnapshotHook for RecordingHook {
        async fn on_snapshot(&self, records: &[Record]) {
            self.seen.lock().await.push(records.to_vec());
        }
    }

    async fn started(source: &MemorySource) -> Arc<Collector> {
        let collector = Arc::new(Collector::new(Arc::new(source.clone()), 200));
        let (trigger, _rx) = RefreshTrigger::channel();
        collector.start(trigger).await;
        collector
    }

    #[test]
    fn test_read_before_start_is_unavailable() {
        let collector = Collector::new(Arc::new(MemorySource::new()), 10);
        let result = collector.read();
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::ApiUnavailable));
        assert_eq!(result.message.as_deref(), Some(DEFAULT_UNAVAILABLE_MESSAGE));
    }

    #[tokio::test]
    async fn test_unavailable_source() {
        let collector = started(&MemorySource::unavailable("bindings missing")).await;

        assert_eq!(collector.availability(), Availability::Unavailable);
        let result = collector.read();
        assert_eq!(result.error_code, Some(ErrorCode::ApiUnavailable));
        assert_eq!(result.message.as_deref(), Some("bindings missing"));
        assert!(result.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_access_denied() {
        let source = MemorySource::new().with_access(AccessStatus::Denied);
        source.set_events(vec![toast("2024-01-01T00:00:00Z", "hidden")]);
        let collector = started(&source).await;

        assert_eq!(collector.availability(), Availability::AccessDenied);
        let result = collector.read();
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::AccessDenied));
        assert_eq!(result.message.as_deref(), Some("Notification access status is DENIED."));
        assert!(result.notifications.is_empty());
        assert_eq!(source.callback_count(), 0);
    }

    #[tokio::test]
    async fn test_ready_read_returns_newest_first() {
        let source = MemorySource::new();
        source.set_events(vec![
            toast("2024-01-01T00:00:00.000Z", "jan-01"),
            toast("2024-01-02T00:00:00.000Z", "jan-02"),
        ]);
        let collector = started(&source).await;

        let result = collector.read();
        assert!(result.ok);
        assert_eq!(result.error_code, None);
        assert_eq!(result.message, None);
        assert_eq!(titles(&result.notifications), vec!["jan-02", "jan-01"]);
        assert_eq!(source.callback_count(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let source = MemorySource::new();
        let collector = started(&source).await;
        let (trigger, _rx) = RefreshTrigger::channel();
        collector.start(trigger).await;

        assert_eq!(source.callback_count(), 1);
        assert_eq!(collector.availability(), Availability::Ready);
    }

    #[tokio::test]
    async fn test_unmappable_event_is_dropped_alone() {
        let source = MemorySource::new();
        source.set_events(vec![
            toast("2024-01-01T00:00:00Z", "one"),
            json!({ "notification": "garbage" }),
            toast("2024-01-03T00:00:00Z", "three"),
        ]);
        let collector = started(&source).await;

        assert_eq!(titles(&collector.snapshot()), vec!["three", "one"]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache_and_availability() {
        let source = MemorySource::new();
        source.set_events(vec![toast("2024-01-01T00:00:00Z", "kept")]);
        let collector = started(&source).await;

        source.set_events(vec![toast("2024-01-02T00:00:00Z", "never seen")]);
        source.fail_next_list();
        collector.refresh().await;

        assert_eq!(collector.availability(), Availability::Ready);
        assert_eq!(titles(&collector.snapshot()), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_refresh_respects_capacity() {
        let source = MemorySource::new();
        source.set_events(
            (1..=9)
                .map(|day| toast(&format!("2024-01-0{}T00:00:00Z", day), &format!("day-{}", day)))
                .collect(),
        );
        let collector = Arc::new(Collector::new(Arc::new(source.clone()), 3));
        let (trigger, _rx) = RefreshTrigger::channel();
        collector.start(trigger).await;

        assert_eq!(titles(&collector.snapshot()), vec!["day-9", "day-8", "day-7"]);
    }

    #[tokio::test]
    async fn test_hook_sees_each_refresh_in_order() {
        let source = MemorySource::new();
        let collector = started(&source).await;
        let hook = Arc::new(RecordingHook::default());
        collector.set_snapshot_hook(hook.clone());

        source.set_events(vec![toast("2024-01-01T00:00:00Z", "first")]);
        collector.refresh().await;
        source.push(toast("2024-01-02T00:00:00Z", "second"));
        collector.refresh().await;

        let seen = hook.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(titles(&seen[0]), vec!["first"]);
        assert_eq!(titles(&seen[1]), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_hook_not_called_on_failed_refresh() {
        let source = MemorySource::new();
        let collector = started(&source).await;
        let hook = Arc::new(RecordingHook::default());
        collector.set_snapshot_hook(hook.clone());

        source.fail_next_list();
        collector.refresh().await;

        assert!(hook.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_without_listener_is_noop() {
        let source = MemorySource::new();
        source.set_events(vec![toast("2024-01-01T00:00:00Z", "ignored")]);
        let collector = Collector::new(Arc::new(source), 10);

        collector.refresh().await;
        assert!(collector.cache().is_empty());
    }

    #[test]
    fn test_read_result_wire_shape() {
        let value = serde_json::to_value(ReadResult::failure(ErrorCode::ReadFailed, "bad")).unwrap();
        assert_eq!(
            value,
            json!({ "ok": false, "errorCode": "READ_FAILED", "message": "bad", "notifications": [] })
        );

        let value = serde_json::to_value(ReadResult::success(Vec::new())).unwrap();
        assert_eq!(
            value,
            json!({ "ok": true, "errorCode": null, "message": null, "notifications": [] })
        );
    }
}

//! In-process event source
//!
//! Holds events in memory and lets the embedding code decide what the
//! listener reports. Change callbacks are invoked on whichever thread calls
//! [`MemorySource::notify_changed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{AccessStatus, ChangeCallback, EventSource, Listener, RawEvent, SourceError};

#[derive(Default)]
struct MemoryState {
    events: Mutex<Vec<RawEvent>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    fail_next_list: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Programmable in-memory event source
#[derive(Clone)]
pub struct MemorySource {
    state: Arc<MemoryState>,
    access: AccessStatus,
    unavailable: Option<String>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// Create an empty source that grants access
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            access: AccessStatus::Allowed,
            unavailable: None,
        }
    }

    /// Create a source whose listener can never be acquired
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Set the outcome reported by `request_access`
    pub fn with_access(mut self, access: AccessStatus) -> Self {
        self.access = access;
        self
    }

    /// Replace the current event set
    pub fn set_events(&self, events: Vec<RawEvent>) {
        debug!(count = events.len(), "MemorySource::set_events: called");
        *lock(&self.state.events) = events;
    }

    /// Append one event
    pub fn push(&self, event: RawEvent) {
        lock(&self.state.events).push(event);
    }

    /// Make the next `list_current_events` call fail
    pub fn fail_next_list(&self) {
        self.state.fail_next_list.store(true, Ordering::SeqCst);
    }

    /// Number of registered change callbacks
    pub fn callback_count(&self) -> usize {
        lock(&self.state.callbacks).len()
    }

    /// Fire every registered change callback on the calling thread
    pub fn notify_changed(&self) {
        let callbacks = lock(&self.state.callbacks);
        debug!(count = callbacks.len(), "MemorySource::notify_changed: firing callbacks");
        for callback in callbacks.iter() {
            callback();
        }
    }
}

impl EventSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn acquire_listener(&self) -> Result<Arc<dyn Listener>, SourceError> {
        if let Some(reason) = &self.unavailable {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        Ok(Arc::new(MemoryListener {
            state: self.state.clone(),
            access: self.access,
        }))
    }
}

struct MemoryListener {
    state: Arc<MemoryState>,
    access: AccessStatus,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn request_access(&self) -> Result<AccessStatus, SourceError> {
        Ok(self.access)
    }

    fn register_change_callback(&self, callback: ChangeCallback) -> Result<(), SourceError> {
        lock(&self.state.callbacks).push(callback);
        Ok(())
    }

    async fn list_current_events(&self) -> Result<Vec<RawEvent>, SourceError> {
        if self.state.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(SourceError::Listing("memory source asked to fail".to_string()));
        }
        Ok(lock(&self.state.events).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_lists_current_events() {
        let source = MemorySource::new();
        source.set_events(vec![json!({"a": 1})]);
        source.push(json!({"b": 2}));

        let listener = source.acquire_listener().unwrap();
        let events = listener.list_current_events().await.unwrap();
        assert_eq!(events, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn test_fail_next_list_fails_once() {
        let source = MemorySource::new();
        let listener = source.acquire_listener().unwrap();

        source.fail_next_list();
        assert!(listener.list_current_events().await.is_err());
        assert!(listener.list_current_events().await.is_ok());
    }

    #[tokio::test]
    async fn test_reports_configured_access() {
        let source = MemorySource::new().with_access(AccessStatus::Denied);
        let listener = source.acquire_listener().unwrap();
        assert_eq!(listener.request_access().await.unwrap(), AccessStatus::Denied);
    }

    #[test]
    fn test_unavailable_source_refuses_listener() {
        let source = MemorySource::unavailable("no bindings");
        let err = source.acquire_listener().err().unwrap();
        assert_eq!(err.to_string(), "no bindings");
    }

    #[test]
    fn test_notify_changed_fires_callbacks() {
        let source = MemorySource::new();
        let listener = source.acquire_listener().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        listener
            .register_change_callback(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        source.notify_changed();
        source.notify_changed();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(source.callback_count(), 1);
    }
}

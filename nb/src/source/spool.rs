//! JSON-lines spool source
//!
//! Any producer can append one raw event per line to the spool file. The
//! listener watches the spool's directory with `notify`, whose callbacks run on
//! the watcher's own thread.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::{AccessStatus, ChangeCallback, EventSource, Listener, RawEvent, SourceError};

/// Event source backed by a JSON-lines spool file
#[derive(Debug, Clone)]
pub struct SpoolSource {
    path: PathBuf,
}

impl SpoolSource {
    /// Create a source reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the spool file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn spool_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl EventSource for SpoolSource {
    fn name(&self) -> &str {
        "spool"
    }

    fn acquire_listener(&self) -> Result<Arc<dyn Listener>, SourceError> {
        debug!(path = %self.path.display(), "SpoolSource::acquire_listener: called");
        let dir = spool_dir(&self.path);
        if !dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "Spool directory {} does not exist",
                dir.display()
            )));
        }
        info!(path = %self.path.display(), "Resolved spool listener");
        Ok(Arc::new(SpoolListener {
            path: self.path.clone(),
            dir,
            watchers: Mutex::new(Vec::new()),
        }))
    }
}

struct SpoolListener {
    path: PathBuf,
    dir: PathBuf,
    /// Watchers stay registered for as long as the listener lives
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

fn touches_spool(event: &Event, spool_name: Option<&std::ffi::OsStr>) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return false;
    }
    event.paths.iter().any(|p| p.file_name() == spool_name)
}

#[async_trait]
impl Listener for SpoolListener {
    async fn request_access(&self) -> Result<AccessStatus, SourceError> {
        match tokio::fs::File::open(&self.path).await {
            Ok(_) => Ok(AccessStatus::Allowed),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "request_access: spool not created yet");
                Ok(AccessStatus::Allowed)
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(AccessStatus::Denied),
            Err(e) => Err(e.into()),
        }
    }

    fn register_change_callback(&self, callback: ChangeCallback) -> Result<(), SourceError> {
        let spool_name = self.path.file_name().map(|n| n.to_os_string());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches_spool(&event, spool_name.as_deref()) => callback(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Spool watcher error"),
        })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %self.dir.display(), "register_change_callback: watching spool directory");

        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(watcher);
        Ok(())
    }

    async fn list_current_events(&self) -> Result<Vec<RawEvent>, SourceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(line = lineno + 1, error = %e, "Skipping unparsable spool line"),
            }
        }

        debug!(count = events.len(), "list_current_events: read spool");
        Ok(events)
    }
}

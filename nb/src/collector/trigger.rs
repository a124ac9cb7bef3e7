//! Refresh hand-off from foreign threads
//!
//! Event sources fire change callbacks on their own threads. [`RefreshTrigger`]
//! is the only thing those callbacks touch: it enqueues onto an unbounded
//! channel, which never blocks the caller. A single worker task on the runtime
//! drains the channel and runs [`Collector::refresh`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::core::Collector;

/// Cloneable, thread-safe handle that schedules a refresh
#[derive(Clone, Debug)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshTrigger {
    /// Create a trigger and the receiving end the worker consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Schedule a refresh; callable from any thread
    pub fn fire(&self) {
        if self.tx.send(()).is_err() {
            debug!("RefreshTrigger::fire: refresh worker has stopped");
        }
    }
}

/// Spawn the refresh worker onto the current runtime
///
/// Triggers that pile up while a refresh is running are folded into the next
/// one. The worker exits once every [`RefreshTrigger`] is dropped.
pub fn spawn_refresh_worker(collector: Arc<Collector>) -> (RefreshTrigger, JoinHandle<()>) {
    let (trigger, rx) = RefreshTrigger::channel();
    let handle = tokio::spawn(refresh_worker(collector, rx));
    (trigger, handle)
}

async fn refresh_worker(collector: Arc<Collector>, mut rx: mpsc::UnboundedReceiver<()>) {
    info!("Refresh worker started");
    while rx.recv().await.is_some() {
        let mut coalesced = 0usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        debug!(coalesced, "refresh_worker: change notification received");
        collector.refresh().await;
    }
    info!("Refresh worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_from_foreign_thread_is_received() {
        let (trigger, mut rx) = RefreshTrigger::channel();

        let remote = trigger.clone();
        std::thread::spawn(move || remote.fire()).join().unwrap();

        assert_eq!(rx.recv().await, Some(()));
    }

    #[test]
    fn test_fire_after_worker_gone_does_not_panic() {
        let (trigger, rx) = RefreshTrigger::channel();
        drop(rx);
        trigger.fire();
    }
}

//! SubscriberHub - the set of connections receiving push frames
//!
//! Membership lives behind a short-held mutex that is never held across I/O,
//! so subscribing or leaving never waits on a broadcast in flight. Broadcasts
//! are serialized by a separate async gate, so every subscriber sees push
//! frames in refresh order.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::messages::PushFrame;
use crate::collector::SnapshotHook;
use crate::domain::Record;

/// Write half of a connection, type-erased
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound side of one client connection
///
/// Shared between the connection's own response path and broadcasts; the
/// writer lock keeps each line whole.
pub struct Peer {
    id: u64,
    label: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("id", &self.id).field("label", &self.label).finish()
    }
}

impl Peer {
    pub fn new(id: u64, label: impl Into<String>, writer: BoxedWriter) -> Self {
        Self {
            id,
            label: label.into(),
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human-readable peer description (usually the socket address)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write one line and flush
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Shut down the write side
    pub async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Errors from hub membership changes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Subscriber hub is shut down.")]
    Closed,
}

/// Outcome of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct Members {
    peers: HashMap<u64, Arc<Peer>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct HubState {
    members: Mutex<Members>,
    /// Serializes broadcasts so frames never interleave
    broadcast_gate: tokio::sync::Mutex<()>,
}

/// Cloneable handle to the shared subscription set
#[derive(Clone, Debug, Default)]
pub struct SubscriberHub {
    state: Arc<HubState>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self) -> MutexGuard<'_, Members> {
        self.state.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a peer to the subscription set; returns the new subscriber count
    pub fn subscribe(&self, peer: Arc<Peer>) -> Result<usize, HubError> {
        let mut members = self.members();
        if members.closed {
            return Err(HubError::Closed);
        }
        debug!(peer = %peer.label(), "SubscriberHub::subscribe: called");
        members.peers.insert(peer.id(), peer);
        Ok(members.peers.len())
    }

    /// Remove a peer; a no-op when it was never subscribed
    pub fn unsubscribe(&self, peer_id: u64) {
        if self.members().peers.remove(&peer_id).is_some() {
            debug!(peer_id, "Unsubscribed peer");
        }
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.members().peers.len()
    }

    /// Drop every subscriber and refuse new ones
    pub fn close(&self) {
        let mut members = self.members();
        members.closed = true;
        members.peers.clear();
        info!("Subscriber hub closed");
    }

    /// Send a push frame to every subscriber and wait for the pass to finish
    ///
    /// The set is copied at the start of the pass. Failed subscribers are
    /// removed once the pass is over.
    pub async fn broadcast(&self, records: &[Record]) -> BroadcastReport {
        let frame = PushFrame::new(records.to_vec());
        let line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize push frame");
                return BroadcastReport::default();
            }
        };

        let _gate = self.state.broadcast_gate.lock().await;
        let peers: Vec<Arc<Peer>> = self.members().peers.values().cloned().collect();
        let mut report = BroadcastReport::default();
        if peers.is_empty() {
            return report;
        }

        let mut dead = Vec::new();
        for peer in &peers {
            match peer.send_line(&line).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %peer.label(), error = %e, "Failed to write event to subscriber");
                    dead.push(peer.id());
                }
            }
        }

        if !dead.is_empty() {
            let mut members = self.members();
            for id in dead {
                if members.peers.remove(&id).is_some() {
                    report.dropped += 1;
                }
            }
        }

        debug!(delivered = report.delivered, dropped = report.dropped, "Broadcast complete");
        report
    }
}

#[async_trait]
impl SnapshotHook for SubscriberHub {
    async fn on_snapshot(&self, records: &[Record]) {
        let report = self.broadcast(records).await;
        if report.delivered + report.dropped > 0 {
            info!(
                notifications = records.len(),
                delivered = report.delivered,
                dropped = report.dropped,
                "Pushed notification snapshot"
            );
        }
    }
}

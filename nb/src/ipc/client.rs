//! IPC client for talking to a running bridge
//!
//! Used by the CLI subcommands and the integration tests. A [`BridgeClient`]
//! only holds the address; [`BridgeClient::connect`] opens a
//! [`BridgeConnection`] that can issue requests and receive push frames.
//! [`BridgeClient::watch`] keeps a subscription alive across bridge restarts,
//! reconnecting with exponential backoff.

use std::collections::VecDeque;
use std::time::Duration;

use eyre::{Context, Result};
use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use uuid::Uuid;

use super::messages::{PushFrame, Request, RequestKind, Response, ResponseBody, SubscribeAck};
use crate::collector::ReadResult;

/// Default timeout for connecting and for each request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

/// Delay before the first retry after a failed connect
pub const BACKOFF_MIN: Duration = Duration::from_millis(500);

/// Upper bound for the reconnect delay
pub const BACKOFF_MAX: Duration = Duration::from_secs(15);

/// Client for a bridge listening at `addr`
#[derive(Debug, Clone)]
pub struct BridgeClient {
    addr: String,
    timeout: Duration,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl BridgeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            backoff_min: BACKOFF_MIN,
            backoff_max: BACKOFF_MAX,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the reconnect delay range used by [`BridgeClient::watch`]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max.max(min);
        self
    }

    /// Delay before connect attempt `failures + 1`
    ///
    /// Zero when nothing has failed yet, then `min`, doubling per failure,
    /// capped at `max`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.backoff_min.saturating_mul(factor).min(self.backoff_max)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open a connection to the bridge
    pub async fn connect(&self) -> Result<BridgeConnection> {
        debug!(addr = %self.addr, "BridgeClient::connect: called");
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .with_context(|| format!("Timed out connecting to {}", self.addr))?
            .with_context(|| format!("Failed to connect to {}", self.addr))?;

        let (reader, writer) = stream.into_split();
        Ok(BridgeConnection {
            reader: BufReader::new(reader),
            writer,
            timeout: self.timeout,
            pending_pushes: VecDeque::new(),
        })
    }

    /// One-shot ping on a fresh connection
    pub async fn ping(&self) -> Result<()> {
        self.connect().await?.ping().await
    }

    /// One-shot read on a fresh connection
    pub async fn read_notifications(&self) -> Result<ReadResult> {
        self.connect().await?.read_notifications().await
    }

    /// Open a connection and subscribe it to push frames
    pub async fn connect_subscribed(&self) -> Result<BridgeConnection> {
        let mut conn = self.connect().await?;
        let message = conn.subscribe().await?;
        debug!(addr = %self.addr, %message, "BridgeClient::connect_subscribed: subscribed");
        Ok(conn)
    }

    /// Stream of push frames that survives bridge restarts
    ///
    /// Each (re)connect subscribes again. Connection state changes are
    /// reported in-band as [`WatchEvent`]s. The stream never ends on its own.
    pub fn watch(&self) -> impl Stream<Item = WatchEvent> {
        let state = WatchState {
            client: self.clone(),
            conn: None,
            failures: 0,
        };
        futures::stream::unfold(state, |mut state| async move {
            let event = state.next_event().await;
            Some((event, state))
        })
    }
}

/// What a [`BridgeClient::watch`] stream yields
#[derive(Debug)]
pub enum WatchEvent {
    /// Connected and subscribed
    Connected,
    /// A connect or subscribe attempt failed; the next one waits `retry_in`
    ConnectFailed {
        failures: u32,
        retry_in: Duration,
        error: String,
    },
    /// The subscribed connection ended
    Disconnected { reason: Option<String> },
    /// A push frame from the bridge
    Frame(PushFrame),
}

struct WatchState {
    client: BridgeClient,
    conn: Option<BridgeConnection>,
    failures: u32,
}

impl WatchState {
    async fn next_event(&mut self) -> WatchEvent {
        if let Some(conn) = self.conn.as_mut() {
            let pushed = conn.next_push().await;
            return match pushed {
                Ok(Some(frame)) => WatchEvent::Frame(frame),
                Ok(None) => {
                    self.conn = None;
                    WatchEvent::Disconnected { reason: None }
                }
                Err(e) => {
                    self.conn = None;
                    WatchEvent::Disconnected {
                        reason: Some(format!("{:#}", e)),
                    }
                }
            };
        }

        let delay = self.client.backoff_delay(self.failures);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.client.connect_subscribed().await {
            Ok(conn) => {
                self.conn = Some(conn);
                self.failures = 0;
                WatchEvent::Connected
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                debug!(failures = self.failures, error = %e, "WatchState::next_event: connect failed");
                WatchEvent::ConnectFailed {
                    failures: self.failures,
                    retry_in: self.client.backoff_delay(self.failures),
                    error: format!("{:#}", e),
                }
            }
        }
    }
}

/// An open connection to the bridge
#[derive(Debug)]
pub struct BridgeConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    /// Push frames that arrived while waiting for a response
    pending_pushes: VecDeque<PushFrame>,
}

/// One inbound line, classified
enum Inbound {
    Response(Response),
    Push(PushFrame),
}

impl BridgeConnection {
    /// Check the bridge is answering
    pub async fn ping(&mut self) -> Result<()> {
        let response = self.request(RequestKind::Ping).await?;
        match response.body {
            ResponseBody::Pong { ok: true, .. } => Ok(()),
            other => Err(eyre::eyre!("Unexpected response to ping: {:?}", other)),
        }
    }

    /// Fetch the current notifications
    ///
    /// A failed read is returned as a `ReadResult` with `ok == false`, not as
    /// an error; only transport and protocol problems are errors.
    pub async fn read_notifications(&mut self) -> Result<ReadResult> {
        let response = self.request(RequestKind::ReadNotifications).await?;
        match response.body {
            ResponseBody::Read(result) => Ok(result),
            other => Err(eyre::eyre!("Unexpected response to read: {:?}", other)),
        }
    }

    /// Join the subscription set; returns the acknowledgement message
    pub async fn subscribe(&mut self) -> Result<String> {
        let response = self.request(RequestKind::SubscribeNotifications).await?;
        match response.body {
            ResponseBody::Subscribed(SubscribeAck { ok: true, message }) => Ok(message),
            ResponseBody::Read(ReadResult { message, .. }) => Err(eyre::eyre!(
                "Subscribe failed: {}",
                message.unwrap_or_else(|| "no message".to_string())
            )),
            other => Err(eyre::eyre!("Unexpected response to subscribe: {:?}", other)),
        }
    }

    /// Wait for the next push frame; `None` once the bridge closes the connection
    pub async fn next_push(&mut self) -> Result<Option<PushFrame>> {
        if let Some(frame) = self.pending_pushes.pop_front() {
            return Ok(Some(frame));
        }

        loop {
            match self.read_inbound().await? {
                None => return Ok(None),
                Some(Inbound::Push(frame)) => return Ok(Some(frame)),
                Some(Inbound::Response(response)) => {
                    debug!(id = %response.id, "next_push: ignoring unsolicited response");
                }
            }
        }
    }

    /// Send a raw line (newline appended) without waiting for a reply
    pub async fn send_raw(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await.context("Failed to write request")?;
        self.writer.write_all(b"\n").await.context("Failed to write newline")?;
        self.writer.flush().await.context("Failed to flush request")?;
        Ok(())
    }

    /// Read the next response, buffering any push frames on the way
    pub async fn next_response(&mut self) -> Result<Response> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.wait_for_response())
            .await
            .context("Timed out waiting for response")?
    }

    async fn wait_for_response(&mut self) -> Result<Response> {
        loop {
            match self.read_inbound().await? {
                None => return Err(eyre::eyre!("Connection closed before response")),
                Some(Inbound::Push(frame)) => self.pending_pushes.push_back(frame),
                Some(Inbound::Response(response)) => return Ok(response),
            }
        }
    }

    async fn request(&mut self, kind: RequestKind) -> Result<Response> {
        let id = format!("req-{}", Uuid::now_v7());
        let request = Request::new(id.clone(), kind);
        debug!(%id, kind = request.kind.as_str(), "BridgeConnection::request: sending");
        self.send_raw(request.to_line().as_bytes()).await?;

        loop {
            let response = self.next_response().await?;
            if response.id == Value::String(id.clone()) {
                return Ok(response);
            }
            debug!(expected = %id, got = %response.id, "request: skipping response for another id");
        }
    }

    async fn read_inbound(&mut self) -> Result<Option<Inbound>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read from bridge")?;
        if read == 0 {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(line.trim_end()).context("Failed to parse message from bridge")?;
        if value.get("id").is_none() && value.get("type").and_then(Value::as_str) == Some("notifications") {
            let frame = serde_json::from_value(value).context("Failed to parse push frame")?;
            return Ok(Some(Inbound::Push(frame)));
        }

        let response = serde_json::from_value(value).context("Failed to parse response")?;
        Ok(Some(Inbound::Response(response)))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let client = BridgeClient::new("127.0.0.1:1");
        assert_eq!(client.backoff_delay(0), Duration::ZERO);
        assert_eq!(client.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(client.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(client.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(client.backoff_delay(5), Duration::from_secs(8));
        assert_eq!(client.backoff_delay(6), BACKOFF_MAX);
        assert_eq!(client.backoff_delay(40), BACKOFF_MAX);
    }

    #[test]
    fn test_custom_backoff_max_never_below_min() {
        let client =
            BridgeClient::new("127.0.0.1:1").with_backoff(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(client.backoff_delay(1), Duration::from_millis(50));
        assert_eq!(client.backoff_delay(4), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_watch_reports_failed_connect() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = BridgeClient::new(addr).with_backoff(Duration::from_millis(5), Duration::from_millis(20));
        let mut events = std::pin::pin!(client.watch());

        match events.next().await {
            Some(WatchEvent::ConnectFailed { failures, retry_in, .. }) => {
                assert_eq!(failures, 1);
                assert_eq!(retry_in, Duration::from_millis(5));
            }
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
        match events.next().await {
            Some(WatchEvent::ConnectFailed { failures, retry_in, .. }) => {
                assert_eq!(failures, 2);
                assert_eq!(retry_in, Duration::from_millis(10));
            }
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
    }
}

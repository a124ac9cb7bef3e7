//! IPC server for the daemon side
//!
//! Accepts TCP connections and runs one task per connection. Each task reads
//! newline-delimited requests, answers every one of them in order, and leaves
//! the subscription set when the connection ends. Shutting the server down
//! also ends every open connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::hub::{Peer, SubscriberHub};
use super::messages::{Request, RequestError, RequestKind, Response};
use crate::collector::Collector;

/// Default maximum request line length (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Shared state handed to every connection task
#[derive(Debug, Clone)]
struct ServerContext {
    collector: Arc<Collector>,
    hub: SubscriberHub,
    max_line_bytes: usize,
    /// Flips to `true` when the server stops
    stopping: watch::Receiver<bool>,
}

/// Listening IPC server
#[derive(Debug)]
pub struct IpcServer {
    listener: TcpListener,
    ctx: ServerContext,
    next_peer_id: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl IpcServer {
    /// Bind the listening socket
    ///
    /// A bind failure is fatal for the daemon, so it is reported before the
    /// collector starts.
    pub async fn bind(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        collector: Arc<Collector>,
        hub: SubscriberHub,
        max_line_bytes: usize,
    ) -> Result<Self> {
        debug!(?addr, "IpcServer::bind: called");
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind IPC server on {:?}", addr))?;

        let (stop_tx, stopping) = watch::channel(false);
        Ok(Self {
            listener,
            ctx: ServerContext {
                collector,
                hub,
                max_line_bytes,
                stopping,
            },
            next_peer_id: AtomicU64::new(1),
            stop_tx,
        })
    }

    /// Address the server is actually listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read listener address")
    }

    /// Accept connections until a shutdown signal arrives
    ///
    /// On shutdown the hub is closed and every connection task is told to
    /// finish.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "IPC server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
                            let ctx = self.ctx.clone();
                            let label = peer_addr.to_string();
                            let (reader, writer) = stream.into_split();
                            tokio::spawn(async move {
                                let peer = Arc::new(Peer::new(id, label, Box::new(writer)));
                                handle_connection(ctx, peer, reader).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept IPC connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(%addr, "IPC server shutting down");
                    break;
                }
            }
        }

        self.ctx.hub.close();
        let _ = self.stop_tx.send(true);
        Ok(())
    }
}

/// Outcome of reading one request line
enum LineRead {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Read one `\n`-terminated line of at most `max` bytes
///
/// A final line without a newline is returned as a line. Reads at most one
/// byte past the limit, so an oversized line is never buffered whole.
async fn read_line<R>(reader: &mut BufReader<R>, max: usize, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = reader.take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line(std::mem::take(buf)))
}

async fn handle_connection<R>(ctx: ServerContext, peer: Arc<Peer>, reader: R)
where
    R: AsyncRead + Unpin,
{
    info!(peer = %peer.label(), "Client connected");
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut stopping = ctx.stopping.clone();

    loop {
        let read = tokio::select! {
            read = read_line(&mut reader, ctx.max_line_bytes, &mut buf) => read,
            _ = server_stopped(&mut stopping) => {
                debug!(peer = %peer.label(), "handle_connection: server stopping");
                break;
            }
        };

        let line = match read {
            Ok(LineRead::Line(line)) => line,
            Ok(LineRead::Eof) => break,
            Ok(LineRead::TooLong) => {
                warn!(peer = %peer.label(), limit = ctx.max_line_bytes, "Request line too long, closing connection");
                let response = Response::invalid(&RequestError::LineTooLong(ctx.max_line_bytes));
                let _ = send_response(&peer, &response).await;
                break;
            }
            Err(e) => {
                warn!(peer = %peer.label(), error = %e, "Failed to read from client");
                break;
            }
        };

        let response = dispatch(&ctx, &peer, &line).await;
        if let Err(e) = send_response(&peer, &response).await {
            warn!(peer = %peer.label(), error = %e, "Failed to write response");
            break;
        }
    }

    ctx.hub.unsubscribe(peer.id());
    if let Err(e) = peer.close().await {
        debug!(peer = %peer.label(), error = %e, "handle_connection: writer shutdown failed");
    }
    info!(peer = %peer.label(), "Client disconnected");
}

/// Resolves once the server has been told to stop; never if it was dropped
/// without stopping
async fn server_stopped(stopping: &mut watch::Receiver<bool>) {
    if stopping.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Turn one raw line into exactly one response
async fn dispatch(ctx: &ServerContext, peer: &Arc<Peer>, line: &[u8]) -> Response {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(peer = %peer.label(), error = %e, "dispatch: invalid request");
            return Response::invalid(&e);
        }
    };
    debug!(peer = %peer.label(), kind = request.kind.as_str(), "dispatch: called");

    match request.kind {
        RequestKind::Ping => Response::pong(request.id),
        RequestKind::ReadNotifications => Response::read(request.id, ctx.collector.read()),
        RequestKind::SubscribeNotifications => {
            match ctx.hub.subscribe(peer.clone()) {
                Ok(count) => {
                    info!(peer = %peer.label(), subscribers = count, "Client subscribed to notifications");
                    Response::subscribed(request.id)
                }
                Err(e) => {
                    warn!(peer = %peer.label(), error = %e, "Subscription refused");
                    Response::failed(request.id, e.to_string())
                }
            }
        }
        RequestKind::Unknown(kind) => Response::unknown_type(request.id, &kind),
    }
}

async fn send_response(peer: &Peer, response: &Response) -> Result<()> {
    let line = serde_json::to_string(response).context("Failed to serialize response")?;
    peer.send_line(&line).await.context("Failed to write response")?;
    debug!(peer = %peer.label(), ok = response.is_ok(), "send_response: sent response");
    Ok(())
}

//! Inter-Process Communication between the bridge and its clients
//!
//! Line-delimited JSON over TCP. Clients send requests (`ping`,
//! `read_notifications`, `subscribe_notifications`) and get exactly one
//! response per request; subscribed connections additionally receive a
//! `notifications` push frame after every refresh.

pub mod client;
pub mod hub;
pub mod messages;
pub mod server;

pub use client::{BACKOFF_MAX, BACKOFF_MIN, BridgeClient, BridgeConnection, WatchEvent};
pub use hub::{BroadcastReport, HubError, Peer, SubscriberHub};
pub use messages::{PushFrame, Request, RequestError, RequestKind, Response, ResponseBody, SubscribeAck};
pub use server::{DEFAULT_MAX_LINE_BYTES, IpcServer};

/// Default listen address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8765;

/// Default `host:port` the bridge listens on and clients connect to
pub fn default_addr() -> String {
    format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)
}

//! Loopback proxy bridge.
//!
//! This crate takes a byte-stream session opened by a host networking layer
//! (the "upstream") and exposes it to local callers as an ordinary TCP
//! listener on a loopback address. Each session serves exactly one local
//! client and lives only as long as both ends do.
//!
//! # Architecture
//!
//! ```text
//! local client  <--TCP-->  loopback listener  <--relay-->  upstream session
//!                                  |                              |
//!                          [SessionController] <--events-- [UpstreamTransport]
//!                                  |
//!                             [EventSink]
//! ```
//!
//! A request URL is first passed through the [`remap`] table to find the
//! URL the transport should dial. The transport starts the session and
//! reports progress as [`UpstreamEvent`]s; once connected, a listener is
//! bound on an ephemeral port and that port is handed back to the caller of
//! [`ProxyBridge::open`]. The first local client to connect is relayed to the
//! upstream stream; later ones are closed immediately. Either side closing
//! or failing tears the whole session down, including its entry in the
//! [`SessionRegistry`] that routes authentication responses.

pub mod bridge;
pub mod config;
pub mod error;
pub mod registry;
pub mod relay;
pub mod remap;
pub mod session;
pub mod testing;
pub mod upstream;
pub mod wire;

// Re-export the primary public types at the crate root for convenience.
pub use bridge::ProxyBridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use registry::SessionRegistry;
pub use remap::{remap, Remapped, RemapError};
pub use session::{ProxyReady, SessionEnd, SessionId, SessionState};
pub use upstream::{BoxedStream, UpstreamEvent, UpstreamHandle, UpstreamSession, UpstreamTransport};
pub use wire::{AuthRequest, ProxyData, ProxyResult};

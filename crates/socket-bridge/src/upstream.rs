//! Contract between the session controller and the host networking layer
//! that owns outbound connections.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

/// A readable/writable upstream byte stream.
pub trait UpstreamStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> UpstreamStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn UpstreamStream>;

/// Lifecycle notifications produced by an upstream session.
pub enum UpstreamEvent {
    /// The session is established; bytes now flow through the stream.
    Connected(BoxedStream),
    /// The remote side wants credentials. Answer with
    /// [`UpstreamHandle::authenticate`].
    AuthRequired { url: String, is_proxy: bool },
    /// Terminal failure.
    Error(String),
    /// Terminal orderly close.
    Closed,
}

impl fmt::Debug for UpstreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamEvent::Connected(_) => f.write_str("Connected"),
            UpstreamEvent::AuthRequired { url, is_proxy } => f
                .debug_struct("AuthRequired")
                .field("url", url)
                .field("is_proxy", is_proxy)
                .finish(),
            UpstreamEvent::Error(msg) => f.debug_tuple("Error").field(msg).finish(),
            UpstreamEvent::Closed => f.write_str("Closed"),
        }
    }
}

/// Control surface of an in-flight upstream session.
pub trait UpstreamHandle: Send + Sync {
    /// Answer an outstanding authentication challenge.
    fn authenticate(&self, username: &str, password: &str);

    /// Close the session. Must tolerate being called after the session has
    /// already ended on its own.
    fn close(&self);
}

/// An upstream session that has been started but not necessarily connected.
pub struct UpstreamSession {
    pub handle: Arc<dyn UpstreamHandle>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

/// Opens upstream sessions.
///
/// `open` must not block: it starts the connection attempt and reports its
/// progress through [`UpstreamSession::events`]. An `Err` means the session
/// could not even be started.
pub trait UpstreamTransport: Send + Sync {
    fn open(&self, url: &Url) -> Result<UpstreamSession>;
}

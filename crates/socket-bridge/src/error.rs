use std::io;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::remap::RemapError;

/// Errors produced while opening or running a proxy session.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid target url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Remap(#[from] RemapError),

    #[error("listen host {0} is not a loopback address")]
    NonLoopbackListenHost(IpAddr),

    #[error("failed to open upstream session: {0}")]
    UpstreamOpen(String),

    #[error("upstream session error: {0}")]
    Upstream(String),

    #[error("upstream session closed")]
    UpstreamClosed,

    #[error("failed to bind local listener: {0}")]
    Bind(#[source] io::Error),

    #[error("local listener error: {0}")]
    Accept(#[source] io::Error),

    #[error("relay I/O error: {0}")]
    Relay(#[source] io::Error),

    #[error("no local client connected within {0:?}")]
    ListenTimeout(Duration),

    #[error("proxy caller went away before the session was ready")]
    CallerGone,

    #[error("proxy bridge is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Returns `true` for I/O errors that just mean the peer hung up.
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

//! Plain TCP upstream transport.
//!
//! Dials the host and port of the remapped URL. No TLS is negotiated, so a
//! secure transport scheme only selects the port.

use std::sync::Arc;
use std::time::Duration;

use socket_bridge::{BridgeError, UpstreamEvent, UpstreamHandle, UpstreamSession, UpstreamTransport};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

struct TcpHandle {
    cancel: CancellationToken,
}

impl UpstreamHandle for TcpHandle {
    fn authenticate(&self, _username: &str, _password: &str) {
        debug!("plain TCP upstream has no authentication; credentials ignored");
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl UpstreamTransport for TcpTransport {
    fn open(&self, url: &Url) -> socket_bridge::Result<UpstreamSession> {
        let host = url
            .host_str()
            .ok_or_else(|| BridgeError::UpstreamOpen(format!("url '{url}' has no host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| BridgeError::UpstreamOpen(format!("url '{url}' has no port")))?;

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let connect_timeout = self.connect_timeout;
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let connect = tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port)));
            let event = tokio::select! {
                biased;
                _ = task_cancel.cancelled() => return,
                result = connect => match result {
                    Ok(Ok(stream)) => {
                        info!(%host, port, "upstream connected");
                        UpstreamEvent::Connected(Box::new(stream))
                    }
                    Ok(Err(err)) => UpstreamEvent::Error(format!("connect to {host}:{port} failed: {err}")),
                    Err(_) => UpstreamEvent::Error(format!(
                        "connect to {host}:{port} timed out after {connect_timeout:?}"
                    )),
                },
            };
            // The session may already be gone; nothing to report then.
            let _ = tx.send(event).await;
        });

        Ok(UpstreamSession {
            handle: Arc::new(TcpHandle { cancel }),
            events: rx,
        })
    }
}

//! In-memory upstream transport for exercising sessions without a network.
//!
//! [`MockTransport`] hands every opened session to the test as a
//! [`MockUpstream`], which scripts the upstream side: connect (yielding the
//! far end of an in-memory duplex stream), request credentials, fail, or
//! close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::upstream::{UpstreamEvent, UpstreamHandle, UpstreamSession, UpstreamStream, UpstreamTransport};

/// Capacity of the in-memory upstream stream, per direction.
const DUPLEX_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct MockHandleState {
    credentials: Mutex<Vec<(String, String)>>,
    closes: AtomicUsize,
}

struct MockHandle {
    state: Arc<MockHandleState>,
}

impl UpstreamHandle for MockHandle {
    fn authenticate(&self, username: &str, password: &str) {
        if let Ok(mut credentials) = self.state.credentials.lock() {
            credentials.push((username.to_string(), password.to_string()));
        }
    }

    fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test-side control of one upstream session opened through
/// [`MockTransport`].
pub struct MockUpstream {
    pub url: Url,
    events: mpsc::Sender<UpstreamEvent>,
    state: Arc<MockHandleState>,
}

impl MockUpstream {
    /// Report the session as connected and return the remote end of its
    /// byte stream.
    pub async fn connect(&self) -> DuplexStream {
        let (near, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.connect_with(near).await;
        far
    }

    /// Report the session as connected over a caller-supplied stream.
    pub async fn connect_with(&self, stream: impl UpstreamStream + 'static) {
        self.send(UpstreamEvent::Connected(Box::new(stream))).await;
    }

    pub async fn require_auth(&self, url: &str, is_proxy: bool) {
        self.send(UpstreamEvent::AuthRequired {
            url: url.to_string(),
            is_proxy,
        })
        .await;
    }

    pub async fn fail(&self, message: &str) {
        self.send(UpstreamEvent::Error(message.to_string())).await;
    }

    pub async fn close(&self) {
        self.send(UpstreamEvent::Closed).await;
    }

    /// Number of times the session controller closed this upstream.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for the controller to close this upstream.
    pub async fn wait_closed(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.close_count() == 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    pub fn credentials(&self) -> Vec<(String, String)> {
        self.state
            .credentials
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    async fn send(&self, event: UpstreamEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(url = %self.url, "mock upstream event dropped, session gone");
        }
    }
}

/// [`UpstreamTransport`] whose sessions are driven by the test.
pub struct MockTransport {
    opened_tx: mpsc::UnboundedSender<MockUpstream>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockUpstream>>,
    fail_next: Mutex<Option<String>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
            fail_next: Mutex::new(None),
        }
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` call fail immediately with `message`.
    pub fn fail_next_open(&self, message: &str) {
        if let Ok(mut fail_next) = self.fail_next.lock() {
            *fail_next = Some(message.to_string());
        }
    }

    /// Wait for the next session opened through this transport.
    pub async fn next_upstream(&self) -> MockUpstream {
        let mut opened = self.opened_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), opened.recv())
            .await
            .ok()
            .flatten()
            .expect("no upstream session was opened")
    }
}

impl UpstreamTransport for MockTransport {
    fn open(&self, url: &Url) -> Result<UpstreamSession> {
        let failure = self.fail_next.lock().ok().and_then(|mut f| f.take());
        if let Some(message) = failure {
            return Err(BridgeError::UpstreamOpen(message));
        }

        let (events_tx, events_rx) = mpsc::channel(16);
        let state = Arc::new(MockHandleState::default());

        let upstream = MockUpstream {
            url: url.clone(),
            events: events_tx,
            state: Arc::clone(&state),
        };
        if self.opened_tx.send(upstream).is_err() {
            return Err(BridgeError::UpstreamOpen("mock transport dropped".to_string()));
        }

        Ok(UpstreamSession {
            handle: Arc::new(MockHandle { state }),
            events: events_rx,
        })
    }
}

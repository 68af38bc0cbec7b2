//! Proxy session lifecycle.
//!
//! Each session is driven by one [`SessionController`] task that
//! multiplexes the two event producers (the upstream session and the local
//! listener/connection) with `tokio::select!`, so state transitions are
//! serialized by construction. Teardown goes through [`Session::teardown`],
//! which only does work the first time it is called.
//!
//! While `Listening`, the controller already reads the upstream stream so
//! that a remote close is noticed without a local client. Bytes read in that
//! window are held (up to one relay buffer) and handed to the client first.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bridge_events::{BridgeEvent, BridgeEventType, EventSink, EventSource};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{is_disconnect, BridgeError, Result};
use crate::registry::SessionRegistry;
use crate::relay::{self, Direction, PumpError};
use crate::upstream::{BoxedStream, UpstreamEvent, UpstreamHandle};

/// Component name attached to every event a session publishes.
pub const COMPONENT: &str = "socket-bridge";

/// How long a connected session keeps relaying toward the local client
/// after the upstream reported an orderly close.
pub const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Unique identifier of one proxy session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    AwaitingListener,
    Listening,
    Connected,
    Closing,
    Closed,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

/// Successful outcome of opening a proxy: the loopback port a local client
/// should dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyReady {
    pub session_id: SessionId,
    pub port: u16,
    pub original_url: String,
}

/// How a session that never failed came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    LocalClosed,
    UpstreamClosed,
}

/// The resources a session shares with the rest of the bridge: its registry
/// entry and the upstream handle.
pub(crate) struct Session {
    id: SessionId,
    target_url: String,
    state: Mutex<SessionState>,
    upstream: Arc<dyn UpstreamHandle>,
    registry: SessionRegistry,
}

impl Session {
    /// Create a session in `Opening` and register it under `target_url`.
    pub(crate) fn register(
        target_url: &str,
        upstream: Arc<dyn UpstreamHandle>,
        registry: SessionRegistry,
    ) -> Self {
        let id = SessionId::new();
        registry.put(target_url, id, Arc::clone(&upstream));
        Self {
            id,
            target_url: target_url.to_string(),
            state: Mutex::new(SessionState::Opening),
            upstream,
            registry,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `next` unless teardown has already started.
    fn transition(&self, next: SessionState) {
        let mut state = self.lock_state();
        if state.is_terminal() {
            return;
        }
        debug!(session_id = %self.id, from = ?*state, to = ?next, "session state change");
        *state = next;
    }

    /// Release the upstream session and the registry entry.
    ///
    /// Returns `true` for the call that actually performed teardown; every
    /// later call is a no-op returning `false`. The listener and local
    /// connection are owned by the controller and are closed when it drops
    /// them.
    pub(crate) fn teardown(&self) -> bool {
        {
            let mut state = self.lock_state();
            if state.is_terminal() {
                return false;
            }
            *state = SessionState::Closing;
        }

        self.upstream.close();
        self.registry.delete(&self.target_url, self.id);

        *self.lock_state() = SessionState::Closed;
        debug!(session_id = %self.id, target_url = %self.target_url, "session torn down");
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Drives one session from `Opening` to `Closed`.
pub(crate) struct SessionController {
    session: Session,
    events: mpsc::Receiver<UpstreamEvent>,
    /// Cleared once the transport has dropped its event sender.
    events_open: bool,
    config: Arc<BridgeConfig>,
    bus: EventSink,
    cancel: CancellationToken,
    reply: Option<oneshot::Sender<Result<ProxyReady>>>,
}

impl SessionController {
    pub(crate) fn new(
        session: Session,
        events: mpsc::Receiver<UpstreamEvent>,
        config: Arc<BridgeConfig>,
        bus: EventSink,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<ProxyReady>>,
    ) -> Self {
        Self {
            session,
            events,
            events_open: true,
            config,
            bus,
            cancel,
            reply: Some(reply),
        }
    }

    /// Run the session to completion. Every exit path, success or failure,
    /// passes through teardown exactly once.
    pub(crate) async fn run(mut self) {
        let outcome = self.drive().await;

        // The listener and the local connection lived inside `drive` and are
        // closed at this point.
        self.session.teardown();

        match outcome {
            Ok(end) => {
                info!(
                    session_id = %self.session.id,
                    target_url = %self.session.target_url,
                    ?end,
                    "proxy session finished"
                );
            }
            Err(err) => self.fail(err).await,
        }

        self.bus
            .emit(BridgeEvent::new(
                BridgeEventType::SessionClosed,
                self.source(),
                serde_json::json!({}),
            ))
            .await;
    }

    async fn drive(&mut self) -> Result<SessionEnd> {
        let mut upstream = self.await_upstream().await?;

        self.session.transition(SessionState::AwaitingListener);
        let listener = TcpListener::bind((self.config.listen_host, self.config.listen_port))
            .await
            .map_err(BridgeError::Bind)?;
        let port = listener.local_addr().map_err(BridgeError::Bind)?.port();

        self.session.transition(SessionState::Listening);
        self.ready(port).await?;

        let mut early = Vec::new();
        let (local, peer) = self
            .await_local_client(&listener, &mut upstream, &mut early)
            .await?;
        self.session.transition(SessionState::Connected);
        info!(
            session_id = %self.session.id,
            %peer,
            port,
            early_bytes = early.len(),
            "local client connected"
        );

        self.relay(upstream, local, early, &listener).await
    }

    /// `Opening`: wait for the upstream session to connect.
    async fn await_upstream(&mut self) -> Result<BoxedStream> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
                _ = caller_gone(&mut self.reply) => return Err(BridgeError::CallerGone),
                event = self.events.recv() => match event {
                    Some(UpstreamEvent::Connected(stream)) => return Ok(stream),
                    Some(UpstreamEvent::AuthRequired { url, is_proxy }) => {
                        self.auth_requested(&url, is_proxy).await;
                    }
                    Some(UpstreamEvent::Error(msg)) => return Err(BridgeError::Upstream(msg)),
                    Some(UpstreamEvent::Closed) | None => return Err(BridgeError::UpstreamClosed),
                },
            }
        }
    }

    /// `Listening`: wait for the first local client. That client is the
    /// only one the session will ever serve.
    ///
    /// Upstream bytes arriving meanwhile are collected into `early`, up to
    /// one relay buffer; past that the stream is left unread.
    async fn await_local_client(
        &mut self,
        listener: &TcpListener,
        upstream: &mut BoxedStream,
        early: &mut Vec<u8>,
    ) -> Result<(TcpStream, SocketAddr)> {
        let limit = self.config.listen_timeout;
        let capacity = self.config.buffer_size.max(1);
        let mut chunk = vec![0u8; capacity];
        let expired = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
                accepted = listener.accept() => return accepted.map_err(BridgeError::Accept),
                read = upstream.read(&mut chunk), if early.len() < capacity => match read {
                    Ok(0) => {
                        debug!(session_id = %self.session.id, "upstream stream ended while listening");
                        return Err(BridgeError::UpstreamClosed);
                    }
                    Ok(n) => early.extend_from_slice(&chunk[..n]),
                    Err(err) => return Err(BridgeError::Relay(err)),
                },
                event = self.events.recv(), if self.events_open => {
                    if let Some(end) = self.on_upstream_event(event).await {
                        return Err(end.err().unwrap_or(BridgeError::UpstreamClosed));
                    }
                }
                _ = &mut expired => {
                    return Err(BridgeError::ListenTimeout(limit.unwrap_or_default()));
                }
            }
        }
    }

    /// `Connected`: relay bytes both ways while turning away any further
    /// local connections.
    ///
    /// Only failures on the local socket count as the client going away;
    /// any failure on the upstream stream is a relay error.
    async fn relay(
        &mut self,
        upstream: BoxedStream,
        local: TcpStream,
        early: Vec<u8>,
        listener: &TcpListener,
    ) -> Result<SessionEnd> {
        let (upstream_read, upstream_write) = tokio::io::split(upstream);
        let (local_read, mut local_write) = local.into_split();
        let buffer_size = self.config.buffer_size;

        let to_upstream = relay::pump(local_read, upstream_write, buffer_size, Direction::ToUpstream);
        let to_local = async move {
            if !early.is_empty() {
                local_write.write_all(&early).await.map_err(PumpError::Write)?;
            }
            let copied = relay::pump(upstream_read, local_write, buffer_size, Direction::ToLocal).await?;
            Ok::<u64, PumpError>(copied + early.len() as u64)
        };
        tokio::pin!(to_upstream, to_local);

        // Armed once the upstream reports an orderly close.
        let drain = tokio::time::sleep(CLOSE_DRAIN_TIMEOUT);
        tokio::pin!(drain);
        let mut draining = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
                copied = &mut to_upstream => {
                    return match copied {
                        Ok(bytes) => {
                            debug!(session_id = %self.session.id, bytes, "local client closed");
                            Ok(SessionEnd::LocalClosed)
                        }
                        Err(PumpError::Read(err)) if is_disconnect(&err) => Ok(SessionEnd::LocalClosed),
                        Err(err) => Err(BridgeError::Relay(err.into_io())),
                    };
                }
                copied = &mut to_local => {
                    return match copied {
                        Ok(bytes) => {
                            debug!(session_id = %self.session.id, bytes, "upstream stream ended");
                            Ok(SessionEnd::UpstreamClosed)
                        }
                        Err(PumpError::Write(err)) if is_disconnect(&err) => Ok(SessionEnd::LocalClosed),
                        Err(err) => Err(BridgeError::Relay(err.into_io())),
                    };
                }
                _ = &mut drain, if draining => {
                    debug!(session_id = %self.session.id, "upstream stream did not end after close");
                    return Ok(SessionEnd::UpstreamClosed);
                }
                accepted = listener.accept() => match accepted {
                    Ok((extra, peer)) => {
                        debug!(session_id = %self.session.id, %peer, "rejecting additional local connection");
                        drop(extra);
                    }
                    Err(err) => return Err(BridgeError::Accept(err)),
                },
                event = self.events.recv(), if self.events_open && !draining => match event {
                    Some(UpstreamEvent::Closed) => {
                        debug!(session_id = %self.session.id, "upstream closed, draining to local client");
                        draining = true;
                        drain
                            .as_mut()
                            .reset(tokio::time::Instant::now() + CLOSE_DRAIN_TIMEOUT);
                    }
                    event => {
                        if let Some(end) = self.on_upstream_event(event).await {
                            return end;
                        }
                    }
                },
            }
        }
    }

    /// Handle an upstream lifecycle event received after the stream was
    /// handed over. Returns `Some` when the event ends the session.
    async fn on_upstream_event(&mut self, event: Option<UpstreamEvent>) -> Option<Result<SessionEnd>> {
        match event {
            Some(UpstreamEvent::AuthRequired { url, is_proxy }) => {
                self.auth_requested(&url, is_proxy).await;
                None
            }
            Some(UpstreamEvent::Connected(_)) => {
                warn!(session_id = %self.session.id, "ignoring repeated upstream connected event");
                None
            }
            Some(UpstreamEvent::Error(msg)) => Some(Err(BridgeError::Upstream(msg))),
            Some(UpstreamEvent::Closed) => Some(Ok(SessionEnd::UpstreamClosed)),
            None => {
                debug!(session_id = %self.session.id, "upstream event channel closed");
                self.events_open = false;
                None
            }
        }
    }

    /// Deliver the single success signal to the caller.
    async fn ready(&mut self, port: u16) -> Result<()> {
        let ready = ProxyReady {
            session_id: self.session.id,
            port,
            original_url: self.session.target_url.clone(),
        };

        if let Some(reply) = self.reply.take() {
            if reply.send(Ok(ready)).is_err() {
                return Err(BridgeError::CallerGone);
            }
        }

        info!(
            session_id = %self.session.id,
            target_url = %self.session.target_url,
            port,
            "proxy session ready"
        );

        self.bus
            .emit(BridgeEvent::new(
                BridgeEventType::SessionReady,
                self.source(),
                serde_json::json!({ "port": port }),
            ))
            .await;

        Ok(())
    }

    /// Report a terminal error: through the caller's reply if it is still
    /// waiting, otherwise on the event bus.
    async fn fail(&mut self, err: BridgeError) {
        match self.reply.take() {
            Some(reply) => {
                warn!(
                    session_id = %self.session.id,
                    target_url = %self.session.target_url,
                    %err,
                    "proxy session failed before ready"
                );
                // The caller may already be gone; nothing else to tell.
                let _ = reply.send(Err(err));
            }
            None => {
                warn!(
                    session_id = %self.session.id,
                    target_url = %self.session.target_url,
                    %err,
                    "proxy session failed"
                );
                self.bus
                    .emit(BridgeEvent::new(
                        BridgeEventType::SessionFailed,
                        self.source(),
                        serde_json::json!({ "error": err.to_string() }),
                    ))
                    .await;
            }
        }
    }

    async fn auth_requested(&self, url: &str, is_proxy: bool) {
        info!(
            session_id = %self.session.id,
            url,
            is_proxy,
            "upstream requested authentication"
        );
        self.bus
            .emit(BridgeEvent::auth_requested(self.source(), url, is_proxy))
            .await;
    }

    fn source(&self) -> EventSource {
        EventSource::new(COMPONENT).with_session(self.session.id, &self.session.target_url)
    }
}

/// Resolves once the caller waiting on `reply` has gone away.
async fn caller_gone(reply: &mut Option<oneshot::Sender<Result<ProxyReady>>>) {
    match reply {
        Some(reply) => reply.closed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandle {
        closes: AtomicUsize,
    }

    impl UpstreamHandle for CountingHandle {
        fn authenticate(&self, _username: &str, _password: &str) {}

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_puts_registry_entry() {
        let registry = SessionRegistry::new();
        let session = Session::register("rtmp://a/live", Arc::new(CountingHandle::default()), registry.clone());

        assert_eq!(session.state(), SessionState::Opening);
        assert!(registry.get("rtmp://a/live").is_some());
    }

    #[test]
    fn teardown_twice_releases_once() {
        let registry = SessionRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        let session = Session::register("rtmp://a/live", handle.clone(), registry.clone());

        assert!(session.teardown());
        assert!(!session.teardown());

        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_teardown_releases_once() {
        let registry = SessionRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        let session = Arc::new(Session::register("rtmp://a/live", handle.clone(), registry));

        let winners: usize = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || session.teardown())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_tears_down() {
        let registry = SessionRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        drop(Session::register("rtmp://a/live", handle.clone(), registry.clone()));

        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn transitions_stop_after_teardown() {
        let session = Session::register(
            "rtmp://a/live",
            Arc::new(CountingHandle::default()),
            SessionRegistry::new(),
        );
        session.transition(SessionState::Listening);
        assert_eq!(session.state(), SessionState::Listening);

        session.teardown();
        session.transition(SessionState::Connected);
        assert_eq!(session.state(), SessionState::Closed);
    }
}

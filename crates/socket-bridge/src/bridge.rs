use std::sync::Arc;

use bridge_events::{BridgeEvent, BridgeEventType, EventSink, EventSource};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::registry::SessionRegistry;
use crate::remap::remap;
use crate::session::{ProxyReady, Session, SessionController, COMPONENT};
use crate::upstream::UpstreamTransport;
use crate::wire::AuthRequest;

/// Publishes upstream sessions as single-client loopback listeners.
///
/// Every call to [`open`](Self::open) creates an independent session; two
/// requests for the same URL are never merged. Cloning is cheap and all
/// clones share the registry and the shutdown signal.
#[derive(Clone)]
pub struct ProxyBridge {
    config: Arc<BridgeConfig>,
    transport: Arc<dyn UpstreamTransport>,
    registry: SessionRegistry,
    events: EventSink,
    shutdown: CancellationToken,
}

impl ProxyBridge {
    /// Fails with [`BridgeError::NonLoopbackListenHost`] when `config`
    /// would bind listeners outside the loopback interface.
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn UpstreamTransport>,
        events: EventSink,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
            registry: SessionRegistry::new(),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of sessions currently registered.
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Open a proxy for `target_url` and wait until its local listener is
    /// bound.
    ///
    /// Resolves exactly once: `Ok` with the loopback port once the upstream
    /// session is connected and the listener is up, or `Err` if the session
    /// failed before that point. Failures after `Ok` are published on the
    /// event bus and surface to the local client as the connection closing.
    ///
    /// Dropping the returned future before it resolves tears the session
    /// down.
    pub async fn open(&self, target_url: &str) -> Result<ProxyReady> {
        let reply = self.start(target_url).await?;
        // A dropped sender means the session task died without answering.
        reply.await.unwrap_or(Err(BridgeError::Shutdown))
    }

    async fn start(&self, target_url: &str) -> Result<oneshot::Receiver<Result<ProxyReady>>> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }

        let requested = Url::parse(target_url).map_err(|source| BridgeError::InvalidUrl {
            url: target_url.to_string(),
            source,
        })?;
        let remapped = remap(&requested)?;
        debug!(
            target_url,
            transport_url = %remapped.transport_url,
            forced_secure = remapped.forced_secure,
            "remapped proxy target"
        );

        let upstream = self.transport.open(&remapped.transport_url)?;

        // Registered before the upstream connects so early authentication
        // challenges can be answered.
        let session = Session::register(target_url, upstream.handle, self.registry.clone());
        let session_id = session.id();

        info!(
            %session_id,
            target_url,
            transport_url = %remapped.transport_url,
            "opening proxy session"
        );

        self.events
            .emit(BridgeEvent::new(
                BridgeEventType::SessionOpened,
                EventSource::new(COMPONENT).with_session(session_id, target_url),
                serde_json::json!({
                    "transport_url": remapped.transport_url.as_str(),
                    "forced_secure": remapped.forced_secure,
                }),
            ))
            .await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let controller = SessionController::new(
            session,
            upstream.events,
            Arc::clone(&self.config),
            self.events.clone(),
            self.shutdown.child_token(),
            reply_tx,
        );
        tokio::spawn(controller.run());

        Ok(reply_rx)
    }

    /// Forward credentials to the session registered under `target_url`.
    ///
    /// Returns `false` when no session is registered under that URL; the
    /// response is then dropped without further effect, since the challenge
    /// may simply have gone stale.
    pub fn authenticate(&self, target_url: &str, username: &str, password: &str) -> bool {
        match self.registry.get(target_url) {
            Some(handle) => {
                debug!(target_url, "forwarding authentication response");
                handle.authenticate(username, password);
                true
            }
            None => {
                debug!(target_url, "no session for authentication response, dropped");
                false
            }
        }
    }

    pub fn authenticate_request(&self, request: &AuthRequest) -> bool {
        self.authenticate(&request.url, &request.username, &request.password)
    }

    /// Tear down every live session and refuse new ones.
    pub fn shutdown(&self) {
        info!(active = self.active_sessions(), "proxy bridge shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

use serde::{Deserialize, Serialize};

/// A single notification published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: BridgeEventType,
    pub source: EventSource,
    pub details: serde_json::Value,
}

impl BridgeEvent {
    /// Create a new `BridgeEvent` with an auto-generated UUID v4 and the
    /// current UTC timestamp.
    pub fn new(event_type: BridgeEventType, source: EventSource, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
        }
    }

    /// Build the notification emitted when an upstream session asks for
    /// credentials. `is_proxy` distinguishes proxy authentication from
    /// origin authentication.
    pub fn auth_requested(source: EventSource, url: &str, is_proxy: bool) -> Self {
        Self::new(
            BridgeEventType::ProxySocketAuthRequested,
            source,
            serde_json::json!({
                "url": url,
                "isProxy": is_proxy,
            }),
        )
    }
}

/// The category of event being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeEventType {
    SessionOpened,
    SessionReady,
    SessionFailed,
    SessionClosed,
    ProxySocketAuthRequested,
    ProcessStarted,
    ProcessStopped,
}

/// Identifies the component and, for session events, the session the event
/// belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl EventSource {
    /// Convenience constructor that only requires the component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            session_id: None,
            target_url: None,
        }
    }

    pub fn with_session(mut self, session_id: impl ToString, target_url: impl Into<String>) -> Self {
        self.session_id = Some(session_id.to_string());
        self.target_url = Some(target_url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_kebab_case() {
        let json = serde_json::to_string(&BridgeEventType::ProxySocketAuthRequested).unwrap();
        assert_eq!(json, "\"proxy-socket-auth-requested\"");
    }

    #[test]
    fn auth_requested_details_shape() {
        let event = BridgeEvent::auth_requested(
            EventSource::new("socket-bridge"),
            "https://example.com:443",
            true,
        );
        assert_eq!(event.event_type, BridgeEventType::ProxySocketAuthRequested);
        assert_eq!(event.details["url"], "https://example.com:443");
        assert_eq!(event.details["isProxy"], true);
    }

    #[test]
    fn source_omits_missing_session_fields() {
        let json = serde_json::to_value(EventSource::new("loopback-bridge")).unwrap();
        assert_eq!(json, serde_json::json!({ "component": "loopback-bridge" }));

        let json = serde_json::to_value(
            EventSource::new("socket-bridge").with_session(7, "rtmp://example.com/live"),
        )
        .unwrap();
        assert_eq!(json["session_id"], "7");
        assert_eq!(json["target_url"], "rtmp://example.com/live");
    }
}

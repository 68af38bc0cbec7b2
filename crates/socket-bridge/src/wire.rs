//! JSON shapes exchanged with callers outside the process.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::session::ProxyReady;

/// Reply to a proxy request: `{ "success": true, "data": { "port": .., "originalUrl": .. } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ProxyData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyData {
    pub port: u16,
    pub original_url: String,
}

impl ProxyResult {
    pub fn ready(ready: &ProxyReady) -> Self {
        Self {
            success: true,
            data: Some(ProxyData {
                port: ready.port,
                original_url: ready.original_url.clone(),
            }),
            error: None,
        }
    }

    pub fn failed(err: &BridgeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }
    }
}

impl From<&Result<ProxyReady, BridgeError>> for ProxyResult {
    fn from(outcome: &Result<ProxyReady, BridgeError>) -> Self {
        match outcome {
            Ok(ready) => Self::ready(ready),
            Err(err) => Self::failed(err),
        }
    }
}

/// Out-of-band answer to a `proxy-socket-auth-requested` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn ready_result_uses_camel_case() {
        let ready = ProxyReady {
            session_id: SessionId::new(),
            port: 41000,
            original_url: "rtmp://example.com/live".to_string(),
        };
        let json = serde_json::to_value(ProxyResult::ready(&ready)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "data": { "port": 41000, "originalUrl": "rtmp://example.com/live" }
            })
        );
    }

    #[test]
    fn failed_result_has_no_data() {
        let result = ProxyResult::failed(&BridgeError::UpstreamClosed);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
        assert_eq!(json["error"], "upstream session closed");
    }

    #[test]
    fn auth_request_parses() {
        let request: AuthRequest = serde_json::from_str(
            r#"{"url":"rtmp://example.com/live","username":"alice","password":"s3cret"}"#,
        )
        .unwrap();
        assert_eq!(request.username, "alice");
    }
}

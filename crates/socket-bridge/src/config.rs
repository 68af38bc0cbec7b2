use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Default relay buffer size per direction.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default time a session waits in `Listening` for its local client.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables shared by every session a [`ProxyBridge`](crate::ProxyBridge)
/// opens.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Address local listeners bind to. Must be a loopback address.
    #[serde(default = "default_listen_host")]
    pub listen_host: IpAddr,
    /// Port local listeners bind to; `0` picks a free ephemeral port per
    /// session.
    #[serde(default)]
    pub listen_port: u16,
    /// How long a ready session waits for its local client. `None` waits
    /// forever.
    #[serde(default = "default_listen_timeout", with = "optional_secs")]
    pub listen_timeout: Option<Duration>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: 0,
            listen_timeout: default_listen_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl BridgeConfig {
    /// Reject settings that would expose sessions beyond this host.
    pub fn validate(&self) -> Result<()> {
        if !self.listen_host.is_loopback() {
            return Err(BridgeError::NonLoopbackListenHost(self.listen_host));
        }
        Ok(())
    }
}

fn default_listen_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_listen_timeout() -> Option<Duration> {
    Some(DEFAULT_LISTEN_TIMEOUT)
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// `listen_timeout_secs`-style values: a number of seconds, `0` or `null`
/// meaning no timeout.
mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback() {
        let config = BridgeConfig::default();
        assert!(config.listen_host.is_loopback());
        assert_eq!(config.listen_timeout, Some(DEFAULT_LISTEN_TIMEOUT));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn loopback_hosts_are_accepted() {
        for host in ["127.0.0.1", "127.0.0.2", "::1"] {
            let config = BridgeConfig {
                listen_host: host.parse().unwrap(),
                ..BridgeConfig::default()
            };
            assert!(config.validate().is_ok(), "{host}");
        }
    }

    #[test]
    fn non_loopback_hosts_are_rejected() {
        for host in ["0.0.0.0", "::", "192.168.1.10"] {
            let config = BridgeConfig {
                listen_host: host.parse().unwrap(),
                ..BridgeConfig::default()
            };
            match config.validate() {
                Err(BridgeError::NonLoopbackListenHost(rejected)) => {
                    assert_eq!(rejected, config.listen_host)
                }
                other => panic!("expected {host} to be rejected, got {:?}", other),
            }
        }
    }

    #[test]
    fn empty_object_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen_timeout, Some(DEFAULT_LISTEN_TIMEOUT));
        assert_eq!(config.listen_port, 0);
    }

    #[test]
    fn zero_or_null_timeout_disables_it() {
        let config: BridgeConfig = serde_json::from_str(r#"{"listen_timeout": 0}"#).unwrap();
        assert_eq!(config.listen_timeout, None);

        let config: BridgeConfig = serde_json::from_str(r#"{"listen_timeout": null}"#).unwrap();
        assert_eq!(config.listen_timeout, None);

        let config: BridgeConfig = serde_json::from_str(r#"{"listen_timeout": 5}"#).unwrap();
        assert_eq!(config.listen_timeout, Some(Duration::from_secs(5)));
    }
}

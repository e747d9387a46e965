//! Connection configuration

use bytes::Bytes;
use printer_link_shared::{defaults, Endpoint, ReconnectPolicy};
use std::time::Duration;

/// Periodic probe written while connected to detect silent peer death
///
/// The probe must be something the remote device tolerates; a single NUL
/// is ignored by most raw-port printers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub probe: Bytes,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(defaults::KEEPALIVE_INTERVAL_MS),
            probe: Bytes::from_static(&[0x00]),
        }
    }
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Remote endpoint; fixed for the lifetime of the manager
    pub endpoint: Endpoint,
    /// Reconnect ceiling, backoff and error handling
    pub reconnect: ReconnectPolicy,
    /// Keepalive probing; `None` disables it
    pub keepalive: Option<KeepAlive>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Bytes requested per transport read
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("127.0.0.1", defaults::PRINTER_PORT),
            reconnect: ReconnectPolicy::default(),
            keepalive: Some(KeepAlive::default()),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            read_buffer_size: defaults::READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::new(Endpoint::new("10.0.0.9", 9100));
        assert_eq!(config.endpoint.host, "10.0.0.9");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_buffer_size, 4096);

        let keepalive = config.keepalive.unwrap();
        assert_eq!(keepalive.interval, Duration::from_secs(30));
        assert_eq!(keepalive.probe.as_ref(), &[0x00]);
    }
}

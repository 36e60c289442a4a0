//! Public types for the hub connection.

use std::time::Duration;

use relayhub_protocol::constants::{
    HANDSHAKE_TIMEOUT, INVOCATION_TIMEOUT, KEEP_ALIVE_INTERVAL, SERVER_TIMEOUT,
};
use reqwest::Url;
use tracing::level_filters::LevelFilter;

/// Lifecycle state of a [`HubConnection`](crate::HubConnection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped by the caller.
    Disconnected,
    /// `start()` is negotiating or waiting for the handshake.
    Connecting,
    /// Handshake completed; invocations are allowed.
    Connected,
    /// Connection lost, walking the reconnect delay sequence.
    Reconnecting,
    /// Every reconnect attempt failed. Only `start()` leaves this state.
    Stopped,
}

/// Resolved configuration for one connection.
///
/// Built by [`HubConnectionBuilder`](crate::HubConnectionBuilder).
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Hub base URL (http, https, ws or wss).
    pub url: Url,
    /// Sent as `apiKey` on the negotiate request.
    pub api_key: Option<String>,
    /// Sent as a bearer header on negotiate and as `access_token` on the socket.
    pub bearer_token: Option<String>,
    /// Sent as `group` on the negotiate request.
    pub group: Option<String>,
    /// Query parameters appended to the WebSocket URL only.
    pub transport_params: Vec<(String, String)>,
    /// Delay before each reconnect attempt. Empty disables reconnection.
    pub reconnect_delays: Vec<Duration>,
    /// Connect straight to `url` without the negotiate request.
    pub skip_negotiation: bool,
    /// Most verbose level this connection logs at.
    pub log_level: LevelFilter,
    pub invocation_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionOptions {
    /// Creates options for `url` with default timeouts and no reconnection.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            bearer_token: None,
            group: None,
            transport_params: Vec::new(),
            reconnect_delays: Vec::new(),
            skip_negotiation: false,
            log_level: LevelFilter::TRACE,
            invocation_timeout: INVOCATION_TIMEOUT,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            server_timeout: SERVER_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let opts = ConnectionOptions::new(Url::parse("http://localhost:5000/hub").unwrap());
        assert_eq!(opts.invocation_timeout, Duration::from_secs(30));
        assert_eq!(opts.keep_alive_interval, Duration::from_secs(15));
        assert_eq!(opts.server_timeout, Duration::from_secs(30));
        assert!(opts.reconnect_delays.is_empty());
        assert!(!opts.skip_negotiation);
    }

    #[test]
    fn connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_ne!(ConnectionState::Disconnected, ConnectionState::Stopped);
    }
}

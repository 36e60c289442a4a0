//! Fluent configuration for [`HubConnection`].

use std::time::Duration;

use relayhub_protocol::constants::DEFAULT_RECONNECT_DELAYS_MS;
use reqwest::Url;
use tracing::level_filters::LevelFilter;

use crate::connection::HubConnection;
use crate::error::HubError;
use crate::types::ConnectionOptions;

/// Builder for [`HubConnection`].
///
/// Only the URL is required. Reconnection is off until
/// [`with_automatic_reconnect`](Self::with_automatic_reconnect) or
/// [`with_reconnect_delays`](Self::with_reconnect_delays) is called.
#[derive(Debug, Default)]
pub struct HubConnectionBuilder {
    url: Option<String>,
    api_key: Option<String>,
    bearer_token: Option<String>,
    group: Option<String>,
    transport_params: Vec<(String, String)>,
    reconnect_delays: Vec<Duration>,
    skip_negotiation: bool,
    log_level: Option<LevelFilter>,
    invocation_timeout: Option<Duration>,
    keep_alive_interval: Option<Duration>,
    server_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    http: Option<reqwest::Client>,
}

impl HubConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub base URL. `http`, `https`, `ws` and `wss` are accepted.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Bearer token for negotiate and, unless the hub issues its own, the socket.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Routing group sent on the negotiate request.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Extra query parameter for the WebSocket URL. Never sent to negotiate.
    #[must_use]
    pub fn with_transport_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transport_params.push((key.into(), value.into()));
        self
    }

    /// Reconnects with the default delays: 0, 2, 10 and 30 seconds.
    #[must_use]
    pub fn with_automatic_reconnect(mut self) -> Self {
        self.reconnect_delays = DEFAULT_RECONNECT_DELAYS_MS
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        self
    }

    /// Reconnects with a custom delay sequence; one attempt per entry.
    /// An empty sequence disables reconnection.
    #[must_use]
    pub fn with_reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }

    /// Connects straight to the URL without the negotiate request.
    #[must_use]
    pub fn skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    /// Most verbose level the connection logs at. `OFF` silences it.
    #[must_use]
    pub fn configure_logging(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Closes the socket when nothing arrives for this long.
    #[must_use]
    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// HTTP client used for negotiate. A default client is created otherwise.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Validates the configuration and creates the connection.
    pub fn build(self) -> Result<HubConnection, HubError> {
        let raw = self
            .url
            .ok_or_else(|| HubError::InvalidUrl("no URL configured".into()))?;
        let url = Url::parse(&raw).map_err(|e| HubError::InvalidUrl(format!("{raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(HubError::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {raw}"
                )));
            }
        }

        let mut options = ConnectionOptions::new(url);
        options.api_key = self.api_key;
        options.bearer_token = self.bearer_token;
        options.group = self.group;
        options.transport_params = self.transport_params;
        options.reconnect_delays = self.reconnect_delays;
        options.skip_negotiation = self.skip_negotiation;
        if let Some(level) = self.log_level {
            options.log_level = level;
        }

        for (name, value, slot) in [
            ("invocation timeout", self.invocation_timeout, &mut options.invocation_timeout),
            ("keep-alive interval", self.keep_alive_interval, &mut options.keep_alive_interval),
            ("server timeout", self.server_timeout, &mut options.server_timeout),
            ("handshake timeout", self.handshake_timeout, &mut options.handshake_timeout),
        ] {
            if let Some(value) = value {
                if value.is_zero() {
                    return Err(HubError::InvalidConfig(format!("{name} must be non-zero")));
                }
                *slot = value;
            }
        }

        Ok(HubConnection::new(options, self.http.unwrap_or_default()))
    }
}

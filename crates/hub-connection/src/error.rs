//! Error type for the hub connection.

use std::time::Duration;

use relayhub_protocol::ProtocolError;
use tokio_tungstenite::tungstenite;

use crate::types::ConnectionState;

/// Errors surfaced by [`HubConnection`](crate::HubConnection).
///
/// Each variant names one cause so callers can branch on it.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("negotiation failed with status {status}: {body}")]
    Negotiation { status: u16, body: String },

    #[error("negotiation request failed: {0}")]
    NegotiationRequest(#[source] reqwest::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("invocation of '{method}' timed out after {timeout:?}")]
    InvocationTimeout { method: String, timeout: Duration },

    #[error("remote invocation failed: {0}")]
    RemoteInvocation(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: usize },

    #[error("connection is not connected")]
    NotConnected,

    #[error("cannot start a connection in the {0:?} state")]
    InvalidState(ConnectionState),

    #[error("connection was stopped")]
    Stopped,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_error_display() {
        let err = HubError::NotConnected;
        assert_eq!(err.to_string(), "connection is not connected");

        let err = HubError::Negotiation {
            status: 401,
            body: "denied".into(),
        };
        assert_eq!(err.to_string(), "negotiation failed with status 401: denied");

        let err = HubError::InvocationTimeout {
            method: "Foo".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("'Foo'"));

        let err = HubError::ReconnectExhausted { attempts: 3 };
        assert!(err.to_string().contains('3'));

        let err = HubError::InvalidState(ConnectionState::Connected);
        assert!(err.to_string().contains("Connected"));
    }
}

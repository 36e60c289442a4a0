//! Reaction to an unexpected socket loss and the reconnect loop.
//!
//! Each loss walks the configured delay sequence from the start: wait
//! `delays[i]`, then try a full negotiate + connect. The first success ends
//! the sequence; running out of delays leaves the connection `Stopped`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::connection::{Install, Shared};
use crate::error::HubError;
use crate::types::ConnectionState;

impl Shared {
    /// Called by the read pump of the transport created for `epoch`.
    ///
    /// Ignored unless that transport is still the live one. Reports from
    /// transports replaced by a reconnect or torn down by `stop()` land here
    /// with an old epoch.
    pub(crate) fn handle_transport_closed(self: &Arc<Self>, epoch: u64, reason: String) {
        let log_level = self.options.log_level;

        let cancel = {
            let mut session = self.lock_session();
            if session.epoch != epoch
                || session.state != ConnectionState::Connected
                || session.transport.is_none()
            {
                hub_log!(log_level, TRACE, epoch, reason = %reason, "stale close report ignored");
                return;
            }
            // Pumps already stopped themselves; dropping only releases handles.
            session.transport = None;
            session.connection_id = None;
            session.state = if self.options.reconnect_delays.is_empty() {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Reconnecting
            };
            session.cancel.clone()
        };

        hub_log!(log_level, WARN, reason = %reason, "connection lost");
        let rejected = self.dispatcher.tracker.reject_all(&reason);
        if rejected > 0 {
            hub_log!(log_level, DEBUG, rejected, "rejected pending invocations");
        }

        let error = HubError::ConnectionClosed(reason);
        if self.options.reconnect_delays.is_empty() {
            self.lifecycle.fire_close(Some(&error));
            return;
        }

        self.lifecycle.fire_reconnecting(Some(&error));
        tokio::spawn(reconnect_loop(self.clone(), cancel));
    }
}

/// Walks the delay sequence until a connect succeeds, `stop()` cancels the
/// session token, or the delays run out.
///
/// Boxed because a transport it installs can spawn this loop again from
/// its close handler.
pub(crate) fn reconnect_loop(
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let log_level = shared.options.log_level;
        let delays = shared.options.reconnect_delays.clone();
        let mut last_error: Option<HubError> = None;

        for (index, delay) in delays.iter().enumerate() {
            let attempt = index + 1;
            hub_log!(
                log_level,
                INFO,
                attempt,
                of = delays.len(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    hub_log!(log_level, DEBUG, attempt, "reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(*delay) => {}
            }

            let Some(epoch) = shared.begin_attempt(ConnectionState::Reconnecting, &cancel) else {
                return;
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    hub_log!(log_level, DEBUG, attempt, "reconnect cancelled");
                    return;
                }
                result = shared.connect_once(epoch) => result,
            };

            match result {
                Ok((transport, connection_id)) => {
                    let id = connection_id.clone();
                    match shared.install(
                        epoch,
                        ConnectionState::Reconnecting,
                        transport,
                        connection_id,
                    ) {
                        Install::Installed => {
                            hub_log!(log_level, INFO, attempt, connection_id = ?id, "reconnected");
                            shared.lifecycle.fire_reconnected(id.as_deref());
                            return;
                        }
                        Install::Superseded => return,
                        Install::Closed => {
                            hub_log!(log_level, WARN, attempt, "socket closed right after reconnect");
                            last_error = Some(HubError::ConnectionClosed(
                                "socket closed right after handshake".into(),
                            ));
                        }
                    }
                }
                Err(e) => {
                    hub_log!(log_level, WARN, attempt, error = %e, "reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        {
            let mut session = shared.lock_session();
            if cancel.is_cancelled() || session.state != ConnectionState::Reconnecting {
                return;
            }
            session.state = ConnectionState::Stopped;
        }

        hub_log!(
            log_level,
            ERROR,
            attempts = delays.len(),
            last_error = ?last_error.as_ref().map(ToString::to_string),
            "reconnect attempts exhausted"
        );
        shared.lifecycle.fire_close(Some(&HubError::ReconnectExhausted {
            attempts: delays.len(),
        }));
    })
}

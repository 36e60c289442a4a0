//! Connection facade.
//!
//! [`HubConnection`] is a cheap handle over one shared session. All state
//! transitions (start, install after reconnect, unexpected close, stop) run
//! under the session mutex, and every transport carries the epoch it was
//! created for, so a close reported by a replaced or stopped transport is
//! ignored.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use relayhub_protocol::{HubMessage, Invocation, encode};

use crate::dispatch::Dispatcher;
use crate::endpoint::resolve_ws_url;
use crate::error::HubError;
use crate::listeners::Listener;
use crate::negotiate::negotiate;
use crate::transport::{CloseHandler, Transport};
use crate::types::{ConnectionOptions, ConnectionState};

type CloseCallback = Arc<dyn Fn(Option<&HubError>) + Send + Sync>;
type ReconnectingCallback = Arc<dyn Fn(Option<&HubError>) + Send + Sync>;
type ReconnectedCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Mutable session data guarded by one lock.
pub(crate) struct Session {
    pub(crate) state: ConnectionState,
    /// Bumped for every connection attempt and on stop.
    pub(crate) epoch: u64,
    pub(crate) transport: Option<Transport>,
    pub(crate) connection_id: Option<String>,
    /// Cancelled by `stop()`; aborts an in-flight start or reconnect loop.
    pub(crate) cancel: CancellationToken,
}

/// Outcome of handing a freshly connected transport to the session.
pub(crate) enum Install {
    Installed,
    /// `stop()` ran while the attempt was in flight.
    Superseded,
    /// The socket closed between handshake and install.
    Closed,
}

/// Lifecycle subscription lists.
#[derive(Default)]
pub(crate) struct Lifecycle {
    reconnecting: Mutex<Vec<ReconnectingCallback>>,
    reconnected: Mutex<Vec<ReconnectedCallback>>,
    closed: Mutex<Vec<CloseCallback>>,
}

fn snapshot<T: Clone>(list: &Mutex<Vec<T>>) -> Vec<T> {
    list.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

impl Lifecycle {
    pub(crate) fn fire_reconnecting(&self, error: Option<&HubError>) {
        for cb in snapshot(&self.reconnecting) {
            if catch_unwind(AssertUnwindSafe(|| cb(error))).is_err() {
                tracing::error!("reconnecting callback panicked");
            }
        }
    }

    pub(crate) fn fire_reconnected(&self, connection_id: Option<&str>) {
        for cb in snapshot(&self.reconnected) {
            if catch_unwind(AssertUnwindSafe(|| cb(connection_id))).is_err() {
                tracing::error!("reconnected callback panicked");
            }
        }
    }

    pub(crate) fn fire_close(&self, error: Option<&HubError>) {
        for cb in snapshot(&self.closed) {
            if catch_unwind(AssertUnwindSafe(|| cb(error))).is_err() {
                tracing::error!("close callback panicked");
            }
        }
    }
}

/// State shared by every handle and by the reconnect loop.
pub(crate) struct Shared {
    pub(crate) options: ConnectionOptions,
    pub(crate) http: reqwest::Client,
    pub(crate) session: Mutex<Session>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) lifecycle: Lifecycle,
}

impl Shared {
    pub(crate) fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one negotiate + connect cycle for `epoch`.
    ///
    /// Returns the live transport and the negotiated connection id, if any.
    pub(crate) async fn connect_once(
        self: &Arc<Self>,
        epoch: u64,
    ) -> Result<(Transport, Option<String>), HubError> {
        let opts = &self.options;

        let negotiated = if opts.skip_negotiation {
            None
        } else {
            Some(
                negotiate(
                    &self.http,
                    &opts.url,
                    opts.api_key.as_deref(),
                    opts.group.as_deref(),
                    opts.bearer_token.as_deref(),
                )
                .await?,
            )
        };

        let ws_url = resolve_ws_url(
            &opts.url,
            negotiated.as_ref(),
            opts.bearer_token.as_deref(),
            &opts.transport_params,
        )?;
        hub_log!(
            opts.log_level,
            DEBUG,
            epoch,
            host = ?ws_url.host_str(),
            path = ws_url.path(),
            redirected = negotiated.as_ref().is_some_and(|n| n.url.is_some()),
            "opening WebSocket"
        );

        let weak = Arc::downgrade(self);
        let on_close: CloseHandler = Box::new(move |reason| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_transport_closed(epoch, reason);
            }
        });

        let transport = Transport::connect(&ws_url, opts, self.dispatcher.clone(), on_close).await?;
        Ok((transport, negotiated.and_then(|n| n.connection_id)))
    }

    /// Reserves a new epoch for an attempt, unless the session moved on.
    pub(crate) fn begin_attempt(
        &self,
        expected: ConnectionState,
        cancel: &CancellationToken,
    ) -> Option<u64> {
        let mut session = self.lock_session();
        if cancel.is_cancelled() || session.state != expected {
            return None;
        }
        session.epoch += 1;
        Some(session.epoch)
    }

    /// Makes `transport` the live one if the session is still waiting for
    /// attempt `epoch` in state `expected`.
    pub(crate) fn install(
        &self,
        epoch: u64,
        expected: ConnectionState,
        transport: Transport,
        connection_id: Option<String>,
    ) -> Install {
        let mut session = self.lock_session();
        if session.epoch != epoch || session.state != expected {
            return Install::Superseded;
        }
        if transport.is_closed() {
            return Install::Closed;
        }
        session.transport = Some(transport);
        session.connection_id = connection_id;
        session.state = ConnectionState::Connected;
        Install::Installed
    }

    /// Sender into the live transport, if connected.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<tungstenite::Message>> {
        let session = self.lock_session();
        match (&session.transport, session.state) {
            (Some(transport), ConnectionState::Connected) => Some(transport.sender()),
            _ => None,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.lock_session().cancel.cancel();
    }
}

/// Client handle for one hub connection.
///
/// Clones share the same socket, listeners and pending invocations.
#[derive(Clone)]
pub struct HubConnection {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.shared.lock_session();
        f.debug_struct("HubConnection")
            .field("url", &self.shared.options.url.as_str())
            .field("state", &session.state)
            .field("connection_id", &session.connection_id)
            .finish_non_exhaustive()
    }
}

impl HubConnection {
    pub(crate) fn new(options: ConnectionOptions, http: reqwest::Client) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(options.log_level));
        let shared = Shared {
            options,
            http,
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                epoch: 0,
                transport: None,
                connection_id: None,
                cancel: CancellationToken::new(),
            }),
            dispatcher,
            lifecycle: Lifecycle::default(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock_session().state
    }

    /// Connection id from the last negotiate, if the hub issued one.
    pub fn connection_id(&self) -> Option<String> {
        self.shared.lock_session().connection_id.clone()
    }

    /// Returns the options this connection was built with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// Negotiates, opens the socket and waits for the handshake.
    ///
    /// The first attempt is not retried: a negotiate or handshake failure is
    /// returned as is and the connection goes back to `Disconnected`.
    pub async fn start(&self) -> Result<(), HubError> {
        let (epoch, cancel) = {
            let mut session = self.shared.lock_session();
            match session.state {
                ConnectionState::Disconnected | ConnectionState::Stopped => {}
                other => return Err(HubError::InvalidState(other)),
            }
            session.state = ConnectionState::Connecting;
            session.epoch += 1;
            session.cancel = CancellationToken::new();
            (session.epoch, session.cancel.clone())
        };
        let log_level = self.shared.options.log_level;
        hub_log!(log_level, INFO, url = %self.shared.options.url, "starting connection");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(HubError::Stopped),
            result = self.shared.connect_once(epoch) => result,
        };

        let error = match result {
            Ok((transport, connection_id)) => {
                let id = connection_id.clone();
                match self.shared.install(
                    epoch,
                    ConnectionState::Connecting,
                    transport,
                    connection_id,
                ) {
                    Install::Installed => {
                        hub_log!(log_level, INFO, connection_id = ?id, "connected");
                        return Ok(());
                    }
                    Install::Superseded => return Err(HubError::Stopped),
                    Install::Closed => {
                        HubError::ConnectionClosed("socket closed during start".into())
                    }
                }
            }
            Err(e) => e,
        };

        {
            let mut session = self.shared.lock_session();
            if session.epoch == epoch && session.state == ConnectionState::Connecting {
                session.state = ConnectionState::Disconnected;
            }
        }
        hub_log!(log_level, WARN, error = %error, "failed to start connection");
        Err(error)
    }

    /// Stops the connection.
    ///
    /// Cancels any reconnect in progress, closes the socket, rejects pending
    /// invocations and, if a socket was open, fires the close callbacks with
    /// no error. Calling it again is a no-op.
    pub async fn stop(&self) {
        let transport = {
            let mut session = self.shared.lock_session();
            session.cancel.cancel();
            session.epoch += 1;
            session.state = ConnectionState::Disconnected;
            session.connection_id = None;
            session.transport.take()
        };

        let rejected = self.shared.dispatcher.tracker.reject_all("connection stopped");
        if rejected > 0 {
            hub_log!(
                self.shared.options.log_level,
                DEBUG,
                rejected,
                "rejected pending invocations on stop"
            );
        }

        if let Some(transport) = transport {
            transport.shutdown().await;
            hub_log!(self.shared.options.log_level, INFO, "connection stopped");
            self.shared.lifecycle.fire_close(None);
        }
    }

    /// Registers `callback` for server calls to `method` (any letter case).
    pub fn on<F>(&self, method: &str, callback: F) -> Listener
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let listener = Listener::new(callback);
        self.shared.dispatcher.listeners.on(method, listener.clone());
        listener
    }

    /// Unregisters every registration of `listener` for `method`.
    /// Returns `true` if anything was removed.
    pub fn off(&self, method: &str, listener: &Listener) -> bool {
        self.shared.dispatcher.listeners.off(method, listener) > 0
    }

    /// Unregisters all callbacks for `method`.
    pub fn off_all(&self, method: &str) {
        self.shared.dispatcher.listeners.off_all(method);
    }

    /// Invokes a hub method and waits for its completion.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, HubError> {
        let tracker = &self.shared.dispatcher.tracker;
        let log_level = self.shared.options.log_level;

        let (id, rx) = tracker.register();
        let Some(sender) = self.shared.sender() else {
            tracker.remove(&id);
            return Err(HubError::NotConnected);
        };

        let msg = HubMessage::Invocation(Invocation::new(method, args).with_id(id.clone()));
        let text = match encode(&msg) {
            Ok(text) => text,
            Err(e) => {
                tracker.remove(&id);
                return Err(e.into());
            }
        };

        hub_log!(log_level, TRACE, invocation_id = %id, method, "sending invocation");
        if sender.send(tungstenite::Message::Text(text.into())).await.is_err() {
            tracker.remove(&id);
            return Err(HubError::ConnectionClosed(
                "socket closed before the invocation was sent".into(),
            ));
        }

        let timeout = self.shared.options.invocation_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(HubError::ConnectionClosed("invocation abandoned".into())),
            Err(_) => {
                tracker.remove(&id);
                hub_log!(log_level, WARN, invocation_id = %id, method, "invocation timed out");
                Err(HubError::InvocationTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Invokes a hub method and deserializes the result.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, HubError> {
        let value = self.invoke(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends an invocation without an id; the hub sends no completion.
    /// Returns once the frame is queued for the socket.
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), HubError> {
        let sender = self.shared.sender().ok_or(HubError::NotConnected)?;
        let text = encode(&HubMessage::Invocation(Invocation::new(method, args)))?;
        sender
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|_| HubError::ConnectionClosed("socket closed before the message was sent".into()))
    }

    /// Subscribes to the start of a reconnect sequence. The argument is the
    /// reason the socket was lost.
    pub fn on_reconnecting<F>(&self, callback: F)
    where
        F: Fn(Option<&HubError>) + Send + Sync + 'static,
    {
        self.shared
            .lifecycle
            .reconnecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Subscribes to successful reconnects. The argument is the new
    /// connection id, if the hub issued one.
    pub fn on_reconnected<F>(&self, callback: F)
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.shared
            .lifecycle
            .reconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Subscribes to the connection closing for good. `None` after `stop()`;
    /// otherwise the reason reconnection did not happen or gave up.
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(Option<&HubError>) + Send + Sync + 'static,
    {
        self.shared
            .lifecycle
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }
}

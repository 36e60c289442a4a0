//! Routes decoded frames to the invocation tracker and listener registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::level_filters::LevelFilter;

use relayhub_protocol::constants::WS_MAX_MESSAGE_SIZE;
use relayhub_protocol::{Frame, FrameBuffer, HubMessage, parse_frame};

use crate::invocation::InvocationTracker;
use crate::listeners::ListenerRegistry;

/// Connection-scoped frame router. Outlives every transport.
pub(crate) struct Dispatcher {
    pub(crate) tracker: Arc<InvocationTracker>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) log_level: LevelFilter,
    /// Hub pings received over the connection's lifetime.
    pub(crate) pings: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(log_level: LevelFilter) -> Self {
        Self {
            tracker: Arc::new(InvocationTracker::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            log_level,
            pings: AtomicU64::new(0),
        }
    }

    /// Feeds one socket text message through `buffer` and dispatches every
    /// complete frame. Bad frames are logged and dropped.
    pub(crate) fn handle_text(&self, buffer: &mut FrameBuffer, text: &str) {
        if text.len() > WS_MAX_MESSAGE_SIZE || buffer.pending_len() > WS_MAX_MESSAGE_SIZE {
            hub_log!(
                self.log_level,
                WARN,
                len = text.len(),
                buffered = buffer.pending_len(),
                "message too large, dropping"
            );
            buffer.clear();
            return;
        }

        for frame in buffer.push(text) {
            match parse_frame(&frame) {
                Ok(Frame::Message(msg)) => self.dispatch(msg),
                Ok(Frame::HandshakeResponse { .. }) => {
                    hub_log!(self.log_level, DEBUG, "ignoring handshake response after handshake");
                }
                Err(e) => {
                    hub_log!(self.log_level, WARN, error = %e, "failed to parse frame, dropping");
                }
            }
        }
    }

    pub(crate) fn dispatch(&self, msg: HubMessage) {
        match msg {
            HubMessage::Invocation(inv) => {
                hub_log!(
                    self.log_level,
                    TRACE,
                    target = %inv.target,
                    args = inv.arguments.len(),
                    "received invocation"
                );
                if inv.invocation_id.is_some() {
                    hub_log!(
                        self.log_level,
                        DEBUG,
                        target = %inv.target,
                        "server expects a result; client results are not supported"
                    );
                }

                let delivery = self.listeners.dispatch(&inv.target, &inv.arguments);
                if delivery.called == 0 {
                    hub_log!(
                        self.log_level,
                        WARN,
                        target = %inv.target,
                        "no listener registered for method"
                    );
                }
                if delivery.panicked > 0 {
                    hub_log!(
                        self.log_level,
                        ERROR,
                        target = %inv.target,
                        panicked = delivery.panicked,
                        "listener panicked"
                    );
                }
            }
            HubMessage::Completion(completion) => {
                let id = completion.invocation_id.clone();
                if self.tracker.complete(completion) {
                    hub_log!(self.log_level, TRACE, invocation_id = %id, "completion delivered");
                } else {
                    hub_log!(
                        self.log_level,
                        WARN,
                        invocation_id = %id,
                        "completion for unknown invocation, dropping"
                    );
                }
            }
            HubMessage::Ping => {
                let pings = self.pings.fetch_add(1, Ordering::Relaxed) + 1;
                hub_log!(self.log_level, TRACE, pings, "received ping");
            }
            HubMessage::Unsupported(msg_type) => {
                hub_log!(self.log_level, DEBUG, msg_type, "ignoring unsupported message type");
            }
        }
    }
}

//! One WebSocket connection attempt and its pumps.
//!
//! [`Transport::connect`] opens the socket, performs the hub handshake and
//! only then spawns the read, write and keep-alive pumps. All three share a
//! cancellation token; dropping the transport cancels it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use relayhub_protocol::constants::WS_MAX_MESSAGE_SIZE;
use relayhub_protocol::{Frame, FrameBuffer, HubMessage, handshake_request, parse_frame};

use crate::dispatch::Dispatcher;
use crate::error::HubError;
use crate::pumps::read::ReadContext;
use crate::types::ConnectionOptions;

/// Called once by the read pump with the reason the socket went away.
pub(crate) type CloseHandler = Box<dyn FnOnce(String) + Send>;

/// How long `shutdown` waits for the pumps to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A live, handshaken WebSocket.
pub(crate) struct Transport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Opens the socket at `url` and completes the hub handshake.
    ///
    /// Fails with [`HubError::Transport`] if the socket cannot be opened and
    /// with [`HubError::Handshake`] if it closes, errors, times out or is
    /// refused before the `{}` acknowledgement arrives.
    pub(crate) async fn connect(
        url: &Url,
        options: &ConnectionOptions,
        dispatcher: Arc<Dispatcher>,
        on_close: CloseHandler,
    ) -> Result<Self, HubError> {
        let log_level = options.log_level;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                .await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(tungstenite::Message::Text(handshake_request().into()))
            .await
            .map_err(|e| HubError::Handshake(format!("failed to send handshake request: {e}")))?;

        let mut buffer = FrameBuffer::new();
        let early = tokio::time::timeout(
            options.handshake_timeout,
            await_handshake(&mut read, &mut write, &mut buffer, log_level),
        )
        .await
        .map_err(|_| {
            HubError::Handshake(format!(
                "no handshake response within {:?}",
                options.handshake_timeout
            ))
        })??;

        hub_log!(log_level, DEBUG, host = ?url.host_str(), path = url.path(), "handshake complete");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
            log_level,
        ));

        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            ReadContext {
                buffer,
                early,
                dispatcher,
                write_tx: write_tx.clone(),
                server_timeout: options.server_timeout,
                cancel: cancel.clone(),
                on_close,
            },
        ));

        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            options.keep_alive_interval,
            cancel.clone(),
            log_level,
        ));

        Ok(Self {
            write_tx,
            cancel,
            handles: vec![read_handle, write_handle, ping_handle],
        })
    }

    /// A transport with no socket behind it; frames queue until dropped.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<tungstenite::Message>) {
        let (write_tx, write_rx) = mpsc::channel(16);
        let transport = Self {
            write_tx,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        };
        (transport, write_rx)
    }

    /// Returns a sender into the write pump.
    pub(crate) fn sender(&self) -> mpsc::Sender<tungstenite::Message> {
        self.write_tx.clone()
    }

    /// `true` once the read pump has exited or the transport was cancelled.
    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the pumps and waits briefly for them to finish, so the close
    /// frame is on the wire before the caller continues.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The pumps watch the token and exit on their own; the read pump
        // may be the task running this drop.
        self.cancel.cancel();
    }
}

/// Reads until the handshake response. Returns any hub frames that arrived
/// before or alongside the acknowledgement, in arrival order.
async fn await_handshake<R, W>(
    read: &mut R,
    write: &mut W,
    buffer: &mut FrameBuffer,
    log_level: LevelFilter,
) -> Result<Vec<HubMessage>, HubError>
where
    R: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    W: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut early = Vec::new();

    loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                return Err(HubError::Handshake(format!(
                    "socket error before handshake response: {e}"
                )));
            }
            None => {
                return Err(HubError::Handshake(
                    "connection closed before handshake response".into(),
                ));
            }
        };

        match msg {
            tungstenite::Message::Text(text) => {
                let mut acked = false;
                for frame in buffer.push(&text) {
                    match parse_frame(&frame) {
                        Ok(Frame::HandshakeResponse { error: Some(error) }) if !acked => {
                            return Err(HubError::Handshake(error));
                        }
                        Ok(Frame::HandshakeResponse { .. }) if !acked => acked = true,
                        Ok(Frame::HandshakeResponse { .. }) => {
                            hub_log!(log_level, DEBUG, "duplicate handshake response ignored");
                        }
                        Ok(Frame::Message(msg)) => early.push(msg),
                        Err(e) => {
                            hub_log!(log_level, WARN, error = %e, "failed to parse frame during handshake, dropping");
                        }
                    }
                }
                if acked {
                    return Ok(early);
                }
            }
            tungstenite::Message::Ping(data) => {
                let _ = write.send(tungstenite::Message::Pong(data)).await;
            }
            tungstenite::Message::Close(_) => {
                return Err(HubError::Handshake(
                    "connection closed before handshake response".into(),
                ));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};

    type WsResult = Result<tungstenite::Message, tungstenite::Error>;

    fn text(s: &str) -> WsResult {
        Ok(tungstenite::Message::Text(s.to_string().into()))
    }

    fn null_sink() -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(
            sink::drain::<tungstenite::Message>().sink_map_err(
                |never: std::convert::Infallible| -> tungstenite::Error { match never {} },
            ),
        )
    }

    #[tokio::test]
    async fn handshake_ack_resolves_and_keeps_trailing_frames() {
        let mut read = stream::iter(vec![text(
            "{}\u{1e}{\"type\":1,\"target\":\"Welcome\",\"arguments\":[]}\u{1e}{\"type\":6",
        )]);
        let mut buffer = FrameBuffer::new();

        let early = await_handshake(&mut read, &mut null_sink(), &mut buffer, LevelFilter::TRACE)
            .await
            .unwrap();

        assert_eq!(early.len(), 1);
        assert!(matches!(&early[0], HubMessage::Invocation(inv) if inv.target == "Welcome"));
        // The partial ping stays buffered for the read pump.
        assert!(buffer.pending_len() > 0);
    }

    #[tokio::test]
    async fn frames_before_ack_are_kept_but_do_not_resolve() {
        let mut read = stream::iter(vec![
            text("{\"type\":6}\u{1e}"),
            text("{\"type\":1,\"target\":\"Early\",\"arguments\":[]}\u{1e}"),
            text("{}\u{1e}"),
        ]);
        let mut buffer = FrameBuffer::new();

        let early = await_handshake(&mut read, &mut null_sink(), &mut buffer, LevelFilter::TRACE)
            .await
            .unwrap();
        assert_eq!(early.len(), 2);
        assert_eq!(early[0], HubMessage::Ping);
    }

    #[tokio::test]
    async fn handshake_error_response_rejects() {
        let mut read = stream::iter(vec![text("{\"error\":\"protocol not supported\"}\u{1e}")]);
        let err = await_handshake(
            &mut read,
            &mut null_sink(),
            &mut FrameBuffer::new(),
            LevelFilter::TRACE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HubError::Handshake(m) if m == "protocol not supported"));
    }

    #[tokio::test]
    async fn close_before_ack_rejects() {
        let mut read = stream::iter(vec![
            text("{\"type\":6}\u{1e}"),
            Ok(tungstenite::Message::Close(None)),
        ]);
        let err = await_handshake(
            &mut read,
            &mut null_sink(),
            &mut FrameBuffer::new(),
            LevelFilter::TRACE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HubError::Handshake(_)));
    }

    #[tokio::test]
    async fn stream_end_before_ack_rejects() {
        let mut read = stream::empty::<WsResult>();
        let err = await_handshake(
            &mut read,
            &mut null_sink(),
            &mut FrameBuffer::new(),
            LevelFilter::TRACE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HubError::Handshake(_)));
    }

    #[tokio::test]
    async fn ack_split_across_messages_resolves() {
        let mut read = stream::iter(vec![text("{"), text("}\u{1e}")]);
        let early = await_handshake(
            &mut read,
            &mut null_sink(),
            &mut FrameBuffer::new(),
            LevelFilter::TRACE,
        )
        .await
        .unwrap();
        assert!(early.is_empty());
    }
}

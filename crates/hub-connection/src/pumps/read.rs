//! Read pump: decodes inbound frames and reports the socket close.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use relayhub_protocol::{FrameBuffer, HubMessage};

use crate::dispatch::Dispatcher;
use crate::transport::CloseHandler;

/// Everything the read pump needs besides the socket stream.
pub(crate) struct ReadContext {
    /// Bytes left over from the handshake read.
    pub(crate) buffer: FrameBuffer,
    /// Frames that arrived before the transport went live.
    pub(crate) early: Vec<HubMessage>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) write_tx: mpsc::Sender<tungstenite::Message>,
    pub(crate) server_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) on_close: CloseHandler,
}

/// Reads the socket until it closes, errors, goes silent for longer than
/// the server timeout, or the transport is cancelled.
///
/// On exit the shared token is cancelled first, which stops the keep-alive
/// and write pumps, and only then is the close reason reported.
pub(crate) async fn read_pump<S>(mut read: S, ctx: ReadContext)
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let ReadContext {
        mut buffer,
        early,
        dispatcher,
        write_tx,
        server_timeout,
        cancel,
        on_close,
    } = ctx;
    let log_level = dispatcher.log_level;

    for msg in early {
        dispatcher.dispatch(msg);
    }

    // Any inbound message, including the server's own pings, resets this.
    let deadline = tokio::time::sleep(server_timeout);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "connection closed locally".to_string(),

            () = &mut deadline => {
                hub_log!(log_level, WARN, timeout = ?server_timeout, "server timeout, closing");
                break format!("server timeout elapsed ({server_timeout:?} without a message)");
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + server_timeout);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                dispatcher.handle_text(&mut buffer, &text);
                            }
                            tungstenite::Message::Ping(data) => {
                                hub_log!(log_level, TRACE, "received WebSocket ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Close(frame) => {
                                hub_log!(log_level, DEBUG, frame = ?frame, "received close frame");
                                break match frame {
                                    Some(f) if !f.reason.is_empty() => {
                                        format!("server closed the connection: {}", f.reason.as_str())
                                    }
                                    _ => "server closed the connection".to_string(),
                                };
                            }
                            _ => {} // Binary and pong frames carry nothing for this protocol.
                        }
                    }
                    Some(Err(e)) => {
                        hub_log!(log_level, WARN, error = %e, "WebSocket read error");
                        break format!("socket error: {e}");
                    }
                    None => {
                        hub_log!(log_level, DEBUG, "WebSocket stream ended");
                        break "socket stream ended".to_string();
                    }
                }
            }
        }
    };

    cancel.cancel();
    on_close(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::Listener;
    use futures_util::stream;
    use std::sync::Mutex;
    use tracing::level_filters::LevelFilter;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        closed: Arc<Mutex<Option<String>>>,
        cancel: CancellationToken,
        write_rx: mpsc::Receiver<tungstenite::Message>,
    }

    fn context(server_timeout: Duration, early: Vec<HubMessage>) -> (ReadContext, Harness) {
        let dispatcher = Arc::new(Dispatcher::new(LevelFilter::TRACE));
        let closed = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::channel(16);

        let sink = closed.clone();
        let ctx = ReadContext {
            buffer: FrameBuffer::new(),
            early,
            dispatcher: dispatcher.clone(),
            write_tx,
            server_timeout,
            cancel: cancel.clone(),
            on_close: Box::new(move |reason| *sink.lock().unwrap() = Some(reason)),
        };
        let harness = Harness {
            dispatcher,
            closed,
            cancel,
            write_rx,
        };
        (ctx, harness)
    }

    fn text(s: &str) -> Result<tungstenite::Message, tungstenite::Error> {
        Ok(tungstenite::Message::Text(s.to_string().into()))
    }

    #[tokio::test]
    async fn read_pump_reports_close_on_stream_end() {
        let (ctx, h) = context(Duration::from_secs(30), Vec::new());
        let empty = stream::empty::<Result<tungstenite::Message, tungstenite::Error>>();

        read_pump(empty, ctx).await;

        assert_eq!(h.closed.lock().unwrap().as_deref(), Some("socket stream ended"));
        assert!(h.cancel.is_cancelled(), "keep-alive must be cancelled before reporting");
    }

    #[tokio::test]
    async fn read_pump_dispatches_frame_split_across_messages() {
        let (ctx, h) = context(Duration::from_secs(30), Vec::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.dispatcher
            .listeners
            .on("echo", Listener::new(move |args| s.lock().unwrap().extend_from_slice(args)));

        let messages = stream::iter(vec![
            text("{\"type\":1,\"target\":\"Ec"),
            text("ho\",\"arguments\":[\"hi\"]}\u{1e}"),
        ]);
        read_pump(messages, ctx).await;

        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!("hi")]);
    }

    #[tokio::test]
    async fn read_pump_dispatches_early_frames_first() {
        let early = vec![HubMessage::Invocation(relayhub_protocol::Invocation::new(
            "order",
            vec![serde_json::json!(1)],
        ))];
        let (ctx, h) = context(Duration::from_secs(30), early);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.dispatcher
            .listeners
            .on("order", Listener::new(move |args| s.lock().unwrap().push(args[0].clone())));

        let messages = stream::iter(vec![text(
            "{\"type\":1,\"target\":\"order\",\"arguments\":[2]}\u{1e}",
        )]);
        read_pump(messages, ctx).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![serde_json::json!(1), serde_json::json!(2)]
        );
    }

    #[tokio::test]
    async fn read_pump_reports_server_close_reason() {
        let (ctx, h) = context(Duration::from_secs(30), Vec::new());
        let close = tungstenite::protocol::CloseFrame {
            code: tungstenite::protocol::frame::coding::CloseCode::Away,
            reason: "maintenance".to_string().into(),
        };
        let messages = stream::iter(vec![Ok(tungstenite::Message::Close(Some(close)))]);

        read_pump(Box::pin(messages.chain(stream::pending())), ctx).await;

        assert_eq!(
            h.closed.lock().unwrap().as_deref(),
            Some("server closed the connection: maintenance")
        );
    }

    #[tokio::test]
    async fn read_pump_answers_websocket_ping() {
        let (ctx, mut h) = context(Duration::from_secs(30), Vec::new());
        let messages = stream::iter(vec![Ok(tungstenite::Message::Ping(vec![1, 2].into()))]);

        read_pump(messages, ctx).await;

        let pong = h.write_rx.recv().await.unwrap();
        assert!(matches!(pong, tungstenite::Message::Pong(_)));
    }

    #[tokio::test]
    async fn read_pump_stops_on_cancel() {
        let (ctx, h) = context(Duration::from_secs(30), Vec::new());
        h.cancel.cancel();

        let silent = stream::pending::<Result<tungstenite::Message, tungstenite::Error>>();
        read_pump(silent, ctx).await;

        assert_eq!(
            h.closed.lock().unwrap().as_deref(),
            Some("connection closed locally")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_times_out_on_silence() {
        let (ctx, h) = context(Duration::from_secs(30), Vec::new());
        let silent = stream::pending::<Result<tungstenite::Message, tungstenite::Error>>();

        read_pump(silent, ctx).await;

        let reason = h.closed.lock().unwrap().clone().unwrap();
        assert!(reason.starts_with("server timeout"), "got {reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_resets_deadline_on_any_message() {
        let server_timeout = Duration::from_secs(30);
        let (ctx, h) = context(server_timeout, Vec::new());

        let wait_before_msg = server_timeout - Duration::from_secs(1);
        let delayed = stream::once(async move {
            tokio::time::sleep(wait_before_msg).await;
            text("{\"type\":6}\u{1e}")
        });
        let combined = Box::pin(delayed.chain(stream::pending()));

        let closed = h.closed.clone();
        let handle = tokio::spawn(read_pump(combined, ctx));

        // Past the original deadline; the ping moved it.
        tokio::time::advance(server_timeout + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(closed.lock().unwrap().is_none(), "deadline should have been reset");

        tokio::time::advance(server_timeout).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        handle.await.unwrap();
        assert!(closed.lock().unwrap().is_some(), "should close after extended deadline");
    }
}

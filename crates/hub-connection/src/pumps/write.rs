//! Write pump: the only task that writes to the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

/// Drains `write_rx` into the socket until cancelled or the channel closes,
/// then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
    log_level: LevelFilter,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    hub_log!(log_level, ERROR, error = %e, "WebSocket write error");
                    // Let the read pump observe the failure and report the close.
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

//! Keep-alive pump: periodic hub Ping frames while connected.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use relayhub_protocol::{HubMessage, encode};

/// Sends a `{"type":6}` frame every `interval` until cancelled.
///
/// Shares the transport's cancellation token, so it stops the moment the
/// socket closes.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    interval: Duration,
    cancel: CancellationToken,
    log_level: LevelFilter,
) {
    let ping = match encode(&HubMessage::Ping) {
        Ok(text) => text,
        Err(e) => {
            hub_log!(log_level, ERROR, error = %e, "failed to encode ping");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                hub_log!(log_level, TRACE, "sending keep-alive ping");
                if write_tx.send(tungstenite::Message::Text(ping.clone().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

//! Protocol constants shared by the codec and the connection engine.

use std::time::Duration;

/// Byte terminating every frame on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Protocol name announced in the handshake request.
pub const PROTOCOL_NAME: &str = "json";

/// Protocol version announced in the handshake request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Message type discriminants carried in the `type` field.
pub const TYPE_INVOCATION: u64 = 1;
pub const TYPE_COMPLETION: u64 = 3;
pub const TYPE_PING: u64 = 6;

/// Largest text message accepted from the socket (16 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Interval between keep-alive pings while connected.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Silence from the server longer than this drops the connection.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed between socket open and the handshake acknowledgement.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time an invocation waits for its completion.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnect delays used by `with_automatic_reconnect` without arguments.
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

//! Frame codec: record-separated JSON text.

use serde_json::Value;

use crate::constants::{PROTOCOL_NAME, PROTOCOL_VERSION, RECORD_SEPARATOR};
use crate::error::ProtocolError;
use crate::messages::HubMessage;

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Reply to the handshake request. `{}` acknowledges; a present
    /// `error` means the server refused the protocol.
    HandshakeResponse { error: Option<String> },
    /// A typed hub message.
    Message(HubMessage),
}

/// Returns the handshake request, terminated by the record separator.
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"{PROTOCOL_NAME}","version":{PROTOCOL_VERSION}}}{RECORD_SEPARATOR}"#)
}

/// Serializes a message and appends the record separator.
pub fn encode(msg: &HubMessage) -> Result<String, ProtocolError> {
    let mut text = serde_json::to_string(&msg.to_value()?)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Parses one frame (without its separator).
///
/// An object without a `type` field is a handshake response.
pub fn parse_frame(text: &str) -> Result<Frame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = &value else {
        return Err(ProtocolError::InvalidFrame);
    };

    if !map.contains_key("type") {
        let error = map.get("error").and_then(Value::as_str).map(str::to_owned);
        return Ok(Frame::HandshakeResponse { error });
    }

    HubMessage::from_value(value).map(Frame::Message)
}

/// Reassembles frames from socket messages.
///
/// Text after the last separator is kept until a later push completes it,
/// so a frame split across two socket messages is decoded once, intact.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    partial: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends socket text and returns every complete, non-empty frame.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);

        let Some(last) = self.partial.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        let complete: String = self.partial.drain(..=last).collect();
        complete
            .split(RECORD_SEPARATOR)
            .filter(|f| !f.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Bytes held back waiting for a separator.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    /// Drops any buffered partial frame.
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

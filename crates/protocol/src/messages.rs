//! Hub message types.
//!
//! Every frame after the handshake is a JSON object with an integer `type`
//! field. Serde cannot tag an enum with integers, so [`HubMessage`] is
//! converted through [`serde_json::Value`] and the payload structs carry the
//! remaining fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{TYPE_COMPLETION, TYPE_INVOCATION, TYPE_PING};
use crate::error::ProtocolError;

/// A call to a hub method, in either direction.
///
/// Without an `invocation_id` the caller does not expect a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
}

impl Invocation {
    /// Creates a fire-and-forget invocation.
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            arguments,
            invocation_id: None,
        }
    }

    /// Attaches an invocation id so the receiver replies with a completion.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }
}

/// Result of a previously sent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    /// Creates a successful completion.
    pub fn ok(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failed completion.
    pub fn error(invocation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(message.into()),
        }
    }
}

/// A decoded hub frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    Completion(Completion),
    Ping,
    /// A frame whose `type` this client does not handle. Kept so callers
    /// can log it; never sent.
    Unsupported(u64),
}

impl HubMessage {
    /// Returns the wire `type` discriminant.
    pub fn message_type(&self) -> u64 {
        match self {
            Self::Invocation(_) => TYPE_INVOCATION,
            Self::Completion(_) => TYPE_COMPLETION,
            Self::Ping => TYPE_PING,
            Self::Unsupported(t) => *t,
        }
    }

    /// Decodes a frame object that carries a `type` field.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let msg_type = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;

        match msg_type {
            TYPE_INVOCATION => Ok(Self::Invocation(serde_json::from_value(value)?)),
            TYPE_COMPLETION => Ok(Self::Completion(serde_json::from_value(value)?)),
            TYPE_PING => Ok(Self::Ping),
            other => Ok(Self::Unsupported(other)),
        }
    }

    /// Encodes the message as a JSON object including its `type` field.
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let mut value = match self {
            Self::Invocation(inv) => serde_json::to_value(inv)?,
            Self::Completion(c) => serde_json::to_value(c)?,
            Self::Ping | Self::Unsupported(_) => Value::Object(serde_json::Map::new()),
        };
        let obj = value.as_object_mut().ok_or(ProtocolError::InvalidFrame)?;
        obj.insert("type".into(), Value::from(self.message_type()));
        Ok(value)
    }
}

//! Wire protocol for the JSON hub protocol.
//!
//! Frames are UTF-8 JSON objects terminated by the ASCII record separator
//! (`0x1E`). Several frames may share one WebSocket message, and a frame may
//! be split across messages; [`codec::FrameBuffer`] reassembles them.

pub mod codec;
pub mod constants;
pub mod error;
pub mod messages;

pub use codec::{Frame, FrameBuffer, encode, handshake_request, parse_frame};
pub use error::ProtocolError;
pub use messages::{Completion, HubMessage, Invocation};

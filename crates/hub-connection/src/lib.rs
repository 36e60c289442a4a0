//! Hub connection engine.
//!
//! Negotiates with a hub endpoint, keeps one WebSocket open at a time,
//! correlates invocations with their completions, dispatches server calls to
//! registered listeners, pings while idle, and reconnects over a configured
//! delay sequence when the socket drops.
//!
//! ```ignore
//! let connection = HubConnectionBuilder::new()
//!     .with_url("https://hub.example.com/chat")
//!     .with_api_key("key")
//!     .with_automatic_reconnect()
//!     .build()?;
//!
//! connection.on("ReceiveMessage", |args| println!("{args:?}"));
//! connection.start().await?;
//! let echoed = connection.invoke("Echo", vec![json!("hi")]).await?;
//! ```

/// Emits a `tracing` event when `$level` passes the connection's verbosity
/// ceiling set through [`HubConnectionBuilder::configure_logging`].
macro_rules! hub_log {
    ($filter:expr, $level:ident, $($arg:tt)+) => {
        if tracing::Level::$level <= $filter {
            tracing::event!(tracing::Level::$level, $($arg)+);
        }
    };
}

pub mod builder;
pub mod connection;
mod dispatch;
pub mod endpoint;
pub mod error;
mod invocation;
pub mod listeners;
pub mod negotiate;
mod pumps;
mod reconnection;
mod transport;
pub mod types;

pub use builder::HubConnectionBuilder;
pub use connection::HubConnection;
pub use error::HubError;
pub use listeners::Listener;
pub use negotiate::NegotiateResponse;
pub use types::{ConnectionOptions, ConnectionState};

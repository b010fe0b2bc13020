//! Real-time conversation client for the Carvoy marketplace.
//!
//! Buyer/seller conversations run over a WebSocket per conversation. This
//! crate keeps that connection alive: it reconnects with exponential
//! backoff, queues outbound intents (messages, typing state, read
//! receipts) while offline and flushes them in order once the transport
//! is back, and fans inbound events out to registered handlers.
//!
//! ```no_run
//! use carvoy_chat::{ChatSession, InboundEvent, SessionConfig};
//!
//! # async fn example() {
//! let session = ChatSession::new(SessionConfig {
//!     origin: "https://carvoy.example".to_string(),
//! });
//!
//! let _sub = session.on_message(|event| {
//!     if let InboundEvent::Message { sender_name, content, .. } = event {
//!         println!("{}: {content}", sender_name.as_deref().unwrap_or("?"));
//!     }
//! });
//!
//! session.connect("veh-4821");
//! session.send_message("Is the Land Cruiser still available?");
//! # }
//! ```
//!
//! UI layers that surface an offline banner should poll
//! [`ChatSession::is_connected`]; connectivity is never reported through
//! errors.

pub mod event;
pub mod session;
pub mod transport;
pub mod wire;

pub use event::{InboundEvent, Presence};
pub use session::{
    ChatSession, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, SessionConfig, Subscription,
};
pub use transport::{BoxFuture, Connect, Transport, TransportError, WsConnector};
pub use wire::OutboundIntent;

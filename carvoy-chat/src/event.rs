//! Inbound events dispatched to conversation subscribers.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Online/offline presence carried by a `status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// One server-originated notification, tagged by `type` on the wire.
///
/// Fields the server omits deserialize as `None`; unknown extra fields are
/// ignored. A frame with an unknown tag or malformed required fields fails
/// to parse and is discarded before dispatch — it never reaches handlers
/// and never affects connection state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A chat message in the conversation.
    Message {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default)]
        sender_id: Option<i64>,
        #[serde(default)]
        sender_name: Option<String>,
        content: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        is_read: bool,
    },

    /// The other participant started or stopped typing.
    Typing {
        #[serde(default)]
        user_id: Option<i64>,
        #[serde(default)]
        user_name: Option<String>,
        is_typing: bool,
    },

    /// Messages were read by the other participant.
    Read {
        message_ids: Vec<i64>,
        #[serde(default)]
        reader_id: Option<i64>,
    },

    /// A participant's presence changed.
    Status {
        user_id: i64,
        #[serde(default)]
        user_name: Option<String>,
        status: Presence,
    },

    /// The server acknowledged the conversation subscription.
    ConnectionEstablished {
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// The server reported an application-level error.
    Error { message: String },
}

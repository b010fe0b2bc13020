//! Outbound wire frames for the conversation endpoint.

use serde::Serialize;

/// A user- or UI-originated action awaiting transmission.
///
/// Serializes to exactly the JSON the conversation endpoint expects:
/// `{"type":"message","message":…}`, `{"type":"typing","is_typing":…}`,
/// `{"type":"read","message_ids":…}`.
///
/// Construction preconditions are enforced at the [`ChatSession`] send
/// methods: a `Message` always holds non-empty trimmed text and a `Read`
/// always holds at least one id.
///
/// [`ChatSession`]: crate::session::ChatSession
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundIntent {
    /// Chat text for the conversation.
    Message { message: String },
    /// Typing-state change of the local participant.
    Typing { is_typing: bool },
    /// Read receipt for one or more received messages.
    Read { message_ids: Vec<i64> },
}

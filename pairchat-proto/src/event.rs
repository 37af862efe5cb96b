//! Socket event types exchanged over the persistent duplex connection.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`. Event names are stable
//! kebab-case strings.

use serde::{Deserialize, Serialize};

use crate::message::{Message, UserId};
use crate::user::User;

/// Close code sent to a socket whose user connected again elsewhere.
///
/// A client receiving it must not reconnect, or two live clients for the
/// same user would keep replacing each other.
pub const REPLACED_CLOSE_CODE: u16 = 4000;

/// Close reason paired with [`REPLACED_CLOSE_CODE`].
pub const REPLACED_CLOSE_REASON: &str = "replaced";

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full replacement of the online user set. Sent to every session.
    PresenceSet(Vec<UserId>),
    /// A just-sent message, pushed to its receiver.
    NewMessage(Message),
    /// Pending messages to `receiver_id` were delivered. Sent to the author.
    Delivered(Delivered),
    /// Messages were viewed. Sent to the author.
    Seen(Seen),
    /// A user's profile changed. Sent to every session.
    ProfileUpdated(User),
}

impl ServerEvent {
    /// Stable wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PresenceSet(_) => "presence-set",
            Self::NewMessage(_) => "new-message",
            Self::Delivered(_) => "delivered",
            Self::Seen(_) => "seen",
            Self::ProfileUpdated(_) => "profile-updated",
        }
    }
}

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// The client is viewing the conversation and has seen `sender_id`'s messages.
    SeenAck(SeenAck),
    /// Echo of a message the client just created, so the receiver can react
    /// without polling.
    NewMessage(Message),
}

/// Payload of [`ServerEvent::Delivered`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivered {
    /// The receiver whose pending messages were delivered.
    pub receiver_id: UserId,
}

/// Payload of [`ServerEvent::Seen`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seen {
    /// The user who viewed the messages.
    #[serde(rename = "senderId")]
    pub viewer_id: UserId,
}

/// Payload of [`ClientEvent::SeenAck`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenAck {
    /// Author of the messages that were seen.
    pub sender_id: UserId,
    /// The viewing user.
    pub receiver_id: UserId,
}

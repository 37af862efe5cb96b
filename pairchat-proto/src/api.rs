//! HTTP response bodies for the request/response surface.
//!
//! Every response carries a `success` flag. Failures are
//! [`FailureResponse`] with a human-readable `message`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::{Message, UserId};
use crate::user::User;

/// Body of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    /// Always `false`.
    pub success: bool,
    /// Why the request failed.
    pub message: String,
}

impl FailureResponse {
    /// Creates a failure body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Body of `POST /api/messages/send/{receiverId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    /// Always `true`.
    pub success: bool,
    /// The persisted message, with status `delivered` if it was pushed.
    pub new_message: Message,
}

/// Body of `GET /api/messages/{peerId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Always `true`.
    pub success: bool,
    /// The conversation, ascending by creation time.
    pub messages: Vec<Message>,
}

/// Body of `GET /api/messages/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    /// Always `true`.
    pub success: bool,
    /// Everyone except the caller.
    pub users: Vec<User>,
    /// Per peer, the number of their messages to the caller not yet seen.
    pub unseen_messages: HashMap<UserId, u32>,
}

/// Body of `PUT /api/auth/update-profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResponse {
    /// Always `true`.
    pub success: bool,
    /// The updated entry.
    pub user: User,
}

/// Body of requests that only report success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Always `true`.
    pub success: bool,
}

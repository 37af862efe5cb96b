//! Message records and the identifiers they carry.
//!
//! These types are shared by the server and the client and serialize to the
//! camelCase JSON shape used on both the HTTP and the socket surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed text body in bytes (64 KB).
pub const MAX_TEXT_SIZE: usize = 64 * 1024;

/// Opaque identity of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Delivery lifecycle of a message.
///
/// Variants are ordered: `Sent < Delivered < Seen`. A stored status only
/// ever moves forward along that order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Persisted, receiver not yet reachable.
    #[default]
    Sent,
    /// Pushed to (or caught up by) the receiver's live session.
    Delivered,
    /// Viewed by the receiver.
    Seen,
}

impl MessageStatus {
    /// Returns `target` if it is strictly ahead of `self`, `None` otherwise.
    ///
    /// This is the single transition rule for stored and displayed statuses:
    /// a `delivered` arriving after `seen` is dropped, never applied.
    #[must_use]
    pub fn advance_to(self, target: Self) -> Option<Self> {
        (target > self).then_some(target)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Seen => write!(f, "seen"),
        }
    }
}

/// An authoritative message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    pub receiver_id: UserId,
    /// Text body, if any.
    #[serde(default)]
    pub text: Option<String>,
    /// Durable URL of the attached image, if any.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Current delivery status.
    pub status: MessageStatus,
    /// When the server persisted the message.
    pub created_at: Timestamp,
}

impl Message {
    /// Returns the other party of this message, seen from `me`.
    #[must_use]
    pub fn counterpart(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether this message involves exactly the pair `a`/`b`, in either direction.
    #[must_use]
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

/// Content submitted by a client when sending a message.
///
/// `image` is an inline payload (a `data:` URL) that the server turns into a
/// durable URL before persisting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingContent {
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline image payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl OutgoingContent {
    /// Text-only content.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// Image-only content.
    pub fn image(payload: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(payload.into()),
        }
    }

    /// Validates this content for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if neither a non-blank text nor an
    /// image is present, or [`ValidationError::TooLarge`] if the text
    /// exceeds [`MAX_TEXT_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let text = self.text.as_deref().map(str::trim).unwrap_or_default();
        let image = self.image.as_deref().unwrap_or_default();
        if text.is_empty() && image.is_empty() {
            return Err(ValidationError::Empty);
        }
        if text.len() > MAX_TEXT_SIZE {
            return Err(ValidationError::TooLarge {
                size: text.len(),
                max: MAX_TEXT_SIZE,
            });
        }
        Ok(())
    }
}

/// Error returned when outgoing content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither text nor image present.
    #[error("message has no content")]
    Empty,
    /// Text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

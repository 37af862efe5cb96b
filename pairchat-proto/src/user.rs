//! User directory entries and profile updates.

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// A public directory entry for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user's identity.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Short profile text.
    #[serde(default)]
    pub bio: String,
    /// Durable URL of the profile picture, if any.
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl User {
    /// Creates a directory entry with no bio or picture.
    pub fn new(id: UserId, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            bio: String::new(),
            profile_pic: None,
        }
    }
}

/// Partial profile update. Absent fields are left unchanged.
///
/// `profile_pic` is an inline image payload, converted to a durable URL by
/// the server before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// New bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// New profile picture payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
}

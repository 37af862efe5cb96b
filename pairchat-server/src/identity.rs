//! Identity: bearer credential to authenticated user id.

use std::sync::Arc;

use pairchat_proto::message::UserId;

use crate::directory::UserDirectory;

/// Validates credentials issued by the identity service.
pub trait IdentityProvider: Send + Sync {
    /// Returns the user a bearer token belongs to.
    fn authenticate(&self, token: &str) -> Option<UserId>;

    /// Whether `user_id` names a known user.
    fn recognizes(&self, user_id: &UserId) -> bool;
}

/// Accepts a user's own id as their token, for known users only.
///
/// Stand-in for a real identity service in development and tests.
pub struct DirectoryIdentity {
    directory: Arc<UserDirectory>,
}

impl DirectoryIdentity {
    #[must_use]
    pub const fn new(directory: Arc<UserDirectory>) -> Self {
        Self { directory }
    }
}

impl IdentityProvider for DirectoryIdentity {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        let user_id = UserId::new(token.trim());
        self.recognizes(&user_id).then_some(user_id)
    }

    fn recognizes(&self, user_id: &UserId) -> bool {
        self.directory.contains(user_id)
    }
}

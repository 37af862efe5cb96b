//! User directory.
//!
//! Holds the public [`User`] entries that the users endpoint lists and that
//! profile updates modify. Seeded from configuration at startup.

use std::collections::BTreeMap;

use pairchat_proto::message::UserId;
use pairchat_proto::user::User;
use parking_lot::RwLock;

/// In-memory user directory, ordered by user id.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<BTreeMap<UserId, User>>,
}

impl UserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.upsert(user);
        }
        directory
    }

    /// Inserts or replaces an entry.
    pub fn upsert(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }

    #[must_use]
    pub fn contains(&self, id: &UserId) -> bool {
        self.users.read().contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &UserId) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    /// Every entry except `caller`'s.
    #[must_use]
    pub fn list_except(&self, caller: &UserId) -> Vec<User> {
        self.users
            .read()
            .values()
            .filter(|user| &user.id != caller)
            .cloned()
            .collect()
    }

    /// Applies a resolved profile change and returns the new entry.
    ///
    /// `profile_pic` must already be a durable URL. Returns `None` if `id`
    /// is unknown.
    pub fn update_profile(
        &self,
        id: &UserId,
        full_name: Option<String>,
        bio: Option<String>,
        profile_pic: Option<String>,
    ) -> Option<User> {
        let mut users = self.users.write();
        let user = users.get_mut(id)?;
        if let Some(full_name) = full_name {
            user.full_name = full_name;
        }
        if let Some(bio) = bio {
            user.bio = bio;
        }
        if let Some(url) = profile_pic {
            user.profile_pic = Some(url);
        }
        Some(user.clone())
    }
}

//! Shared server state injected into every handler.

use std::sync::Arc;
use std::time::Duration;

use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::UserId;
use pairchat_proto::user::{ProfileUpdate, User};

use crate::config::ServerConfig;
use crate::delivery::DeliveryStatusMachine;
use crate::directory::UserDirectory;
use crate::identity::{DirectoryIdentity, IdentityProvider};
use crate::media::{InMemoryMedia, MediaError, MediaStore};
use crate::reconcile::ReconnectReconciler;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Why a profile update was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("user not found")]
    UnknownUser,
    #[error("profile picture upload failed: {0}")]
    Media(#[from] MediaError),
}

/// Everything the HTTP and WebSocket handlers share.
pub struct ServerState<S> {
    pub registry: Arc<ConnectionRegistry>,
    pub directory: Arc<UserDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
    pub media: Arc<dyn MediaStore>,
    pub store: Arc<S>,
    pub delivery: DeliveryStatusMachine<S>,
    pub reconciler: ReconnectReconciler<S>,
    pub ping_interval: Duration,
    pub max_body_size: usize,
}

impl<S: MessageStore> ServerState<S> {
    /// Builds state from a resolved configuration, with the directory
    /// seeded from `config.users` and in-memory identity and media.
    pub fn new(store: Arc<S>, config: &ServerConfig) -> Self {
        let directory = Arc::new(UserDirectory::with_users(config.users.iter().cloned()));
        let identity = Arc::new(DirectoryIdentity::new(Arc::clone(&directory)));
        let media = Arc::new(InMemoryMedia::new(config.public_url.clone()));
        Self::with_parts(store, directory, identity, media, config)
    }

    /// Builds state from explicit collaborators.
    pub fn with_parts(
        store: Arc<S>,
        directory: Arc<UserDirectory>,
        identity: Arc<dyn IdentityProvider>,
        media: Arc<dyn MediaStore>,
        config: &ServerConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = DeliveryStatusMachine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&media),
        );
        let reconciler = ReconnectReconciler::new(Arc::clone(&store), Arc::clone(&registry));
        Self {
            registry,
            directory,
            identity,
            media,
            store,
            delivery,
            reconciler,
            ping_interval: config.ping_interval,
            max_body_size: config.max_body_size,
        }
    }

    /// Applies `update` to `user_id`'s directory entry and broadcasts the
    /// result as `profile-updated` to every session.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the user is unknown or the picture
    /// cannot be stored.
    pub async fn update_profile(
        &self,
        user_id: &UserId,
        update: ProfileUpdate,
    ) -> Result<User, ProfileError> {
        if !self.directory.contains(user_id) {
            return Err(ProfileError::UnknownUser);
        }
        let profile_pic = update
            .profile_pic
            .as_deref()
            .filter(|payload| !payload.is_empty())
            .map(|payload| self.media.store_image(payload))
            .transpose()?;
        let user = self
            .directory
            .update_profile(user_id, update.full_name, update.bio, profile_pic)
            .ok_or(ProfileError::UnknownUser)?;
        tracing::info!(user_id = %user_id, "profile updated");
        self.registry
            .broadcast(&ServerEvent::ProfileUpdated(user.clone()))
            .await;
        Ok(user)
    }

    /// Closes every live session.
    pub async fn close_all_sessions(&self) {
        self.registry.close_all().await;
    }
}

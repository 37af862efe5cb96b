//! Delivery status machine.
//!
//! Moves messages along `sent → delivered → seen` and decides which
//! transitions go on the wire. Every transition that changes a record
//! notifies only the sender's live session. Store failures during a send
//! fail the send; store failures during a bulk status update are logged and
//! swallowed.

use std::sync::Arc;

use pairchat_proto::event::{SeenAck, ServerEvent, Seen};
use pairchat_proto::message::{
    Message, MessageStatus, OutgoingContent, UserId, ValidationError,
};

use crate::directory::UserDirectory;
use crate::media::{MediaError, MediaStore};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageDraft, MessageStore, StatusFilter, StoreError};

/// Why a send was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown receiver: {0}")]
    UnknownReceiver(UserId),
    #[error("cannot send a message to yourself")]
    SelfAddressed,
    #[error("image upload failed: {0}")]
    Media(#[from] MediaError),
    #[error("could not save message: {0}")]
    Store(#[from] StoreError),
}

/// Applies status transitions to stored messages and pushes the resulting
/// events.
pub struct DeliveryStatusMachine<S> {
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<UserDirectory>,
    media: Arc<dyn MediaStore>,
}

impl<S> Clone for DeliveryStatusMachine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            directory: Arc::clone(&self.directory),
            media: Arc::clone(&self.media),
        }
    }
}

impl<S: MessageStore> DeliveryStatusMachine<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ConnectionRegistry>,
        directory: Arc<UserDirectory>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            store,
            registry,
            directory,
            media,
        }
    }

    /// Persists a message from `sender` to `receiver`.
    ///
    /// If the receiver has a live session the message is promoted to
    /// `delivered` before it is pushed, and the returned record carries that
    /// status. An offline receiver is not an error: the message stays
    /// `sent` until the receiver reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the content is invalid, the receiver is
    /// unknown, or the image or message cannot be stored.
    pub async fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: OutgoingContent,
    ) -> Result<Message, SendError> {
        content.validate()?;
        if sender == receiver {
            return Err(SendError::SelfAddressed);
        }
        if !self.directory.contains(receiver) {
            return Err(SendError::UnknownReceiver(receiver.clone()));
        }

        let image_url = content
            .image
            .as_deref()
            .filter(|payload| !payload.is_empty())
            .map(|payload| self.media.store_image(payload))
            .transpose()?;
        let text = content.text.filter(|text| !text.trim().is_empty());

        let mut message = self
            .store
            .create(MessageDraft {
                sender_id: sender.clone(),
                receiver_id: receiver.clone(),
                text,
                image_url,
            })
            .await?;

        if self.registry.lookup(receiver).await.is_some() {
            let filter = StatusFilter::addressed_to(receiver.clone()).only(message.id);
            match self
                .store
                .advance_status(&filter, MessageStatus::Delivered)
                .await
            {
                Ok(changed) => {
                    if let Some(updated) = changed.into_iter().next() {
                        message = updated;
                    }
                }
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "failed to mark message delivered");
                }
            }
            self.registry
                .push(receiver, ServerEvent::NewMessage(message.clone()))
                .await;
        }

        tracing::info!(
            message_id = %message.id,
            sender = %sender,
            receiver = %receiver,
            status = %message.status,
            "message sent"
        );
        Ok(message)
    }

    /// Marks every message from `sender` to `viewer` as seen and notifies
    /// the sender if anything changed.
    ///
    /// Returns the records that changed. Store failures are logged and
    /// yield an empty list.
    pub async fn mark_seen(&self, viewer: &UserId, sender: &UserId) -> Vec<Message> {
        let filter = StatusFilter::addressed_to(viewer.clone()).from_sender(sender.clone());
        let changed = match self.store.advance_status(&filter, MessageStatus::Seen).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(viewer = %viewer, sender = %sender, error = %e, "failed to mark messages seen");
                return Vec::new();
            }
        };
        if !changed.is_empty() {
            tracing::debug!(viewer = %viewer, sender = %sender, count = changed.len(), "messages seen");
            self.registry
                .push(
                    sender,
                    ServerEvent::Seen(Seen {
                        viewer_id: viewer.clone(),
                    }),
                )
                .await;
        }
        changed
    }

    /// Applies a `seen-ack` received on `session_user`'s socket.
    ///
    /// The viewer is always the session's user; a disagreeing claimed
    /// receiver is ignored.
    pub async fn acknowledge_seen(&self, session_user: &UserId, ack: &SeenAck) -> usize {
        if &ack.receiver_id != session_user {
            tracing::warn!(
                session_user = %session_user,
                claimed = %ack.receiver_id,
                "seen-ack receiver does not match session; using session user"
            );
        }
        self.mark_seen(session_user, &ack.sender_id).await.len()
    }

    /// Returns the conversation between `me` and `peer` and marks the
    /// peer's messages to `me` as seen.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the conversation cannot be listed.
    pub async fn conversation(&self, me: &UserId, peer: &UserId) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.store.list_between(me, peer).await?;
        let seen = self.mark_seen(me, peer).await;
        for message in &mut messages {
            if seen.iter().any(|changed| changed.id == message.id) {
                message.status = MessageStatus::Seen;
            }
        }
        Ok(messages)
    }

    /// Forwards a sender's echo of its own message to the receiver.
    ///
    /// The stored record is forwarded, and only if `session_user` wrote it.
    /// Returns whether anything was pushed.
    pub async fn forward_echo(&self, session_user: &UserId, echo: &Message) -> bool {
        let stored = match self.store.find(echo.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::warn!(message_id = %echo.id, "echo for unknown message");
                return false;
            }
            Err(e) => {
                tracing::warn!(message_id = %echo.id, error = %e, "failed to load echoed message");
                return false;
            }
        };
        if &stored.sender_id != session_user {
            tracing::warn!(
                message_id = %stored.id,
                session_user = %session_user,
                "echo from a user who did not write the message"
            );
            return false;
        }
        let receiver = stored.receiver_id.clone();
        self.registry
            .push(&receiver, ServerEvent::NewMessage(stored))
            .await
    }
}

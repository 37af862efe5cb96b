//! Optimistic sends.
//!
//! A send shows up in the conversation immediately as a pending entry, then
//! settles exactly once: committed with the server's record, or discarded
//! on failure. There is no automatic retry.
//!
//! A committed entry carries the server's status only. If a higher status
//! was reported while the send was in flight and the conversation is open,
//! its history is re-fetched so the server decides.

use std::sync::Arc;

use parking_lot::Mutex;
use pairchat_proto::event::ClientEvent;
use pairchat_proto::message::{Message, OutgoingContent, UserId, ValidationError};

use crate::api::{ApiError, ChatApi};
use crate::session::SessionEmitter;
use crate::state::{ChatState, PendingMessage, Settled, TempId};

/// Why a send failed. The pending entry has been removed in every case.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The content was rejected before any request was made.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// The server refused or could not be reached.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Issues sends against a [`ChatApi`] and settles their placeholders.
pub struct OptimisticMessageQueue<A> {
    api: Arc<A>,
}

impl<A> Clone for OptimisticMessageQueue<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: ChatApi> OptimisticMessageQueue<A> {
    #[must_use]
    pub const fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Inserts the placeholder for a send to `peer`.
    pub fn begin_send(state: &Mutex<ChatState>, peer: &UserId, content: OutgoingContent) -> TempId {
        state
            .lock()
            .insert_pending(PendingMessage::new(peer.clone(), content))
    }

    /// Replaces the placeholder with the server's record.
    pub fn commit(state: &Mutex<ChatState>, temp_id: TempId, message: Message) -> Option<Settled> {
        state.lock().commit_pending(temp_id, message)
    }

    /// Re-fetches the open conversation with `peer` after a hinted commit.
    ///
    /// A closed conversation is left alone: fetching marks it seen on the
    /// server. It is reconciled when it is next opened.
    async fn reconcile(&self, state: &Mutex<ChatState>, peer: &UserId, committed: &mut Message) {
        if !state.lock().is_open(peer) {
            tracing::debug!(peer = %peer, "status hint deferred to next open");
            return;
        }
        match self.api.conversation(peer).await {
            Ok(history) => {
                let mut state = state.lock();
                state.load_history(peer, history);
                if let Some(status) = state.status_of(peer, committed.id) {
                    committed.status = status;
                }
            }
            Err(e) => tracing::warn!(peer = %peer, error = %e, "status reconcile failed"),
        }
    }

    /// Drops the placeholder after a failed send.
    pub fn discard(state: &Mutex<ChatState>, peer: &UserId, temp_id: TempId) {
        state.lock().discard_pending(peer, temp_id);
    }

    /// Sends `content` to `peer`.
    ///
    /// On success the placeholder is committed and the record is echoed on
    /// the socket through `emitter`, if one is connected.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if validation or the request fails; the
    /// placeholder is gone by then.
    pub async fn send(
        &self,
        state: &Mutex<ChatState>,
        emitter: Option<&SessionEmitter>,
        peer: &UserId,
        content: OutgoingContent,
    ) -> Result<Message, SendError> {
        content.validate()?;
        let temp_id = Self::begin_send(state, peer, content.clone());
        tracing::debug!(peer = %peer, temp_id = %temp_id, "message pending");

        match self.api.send_message(peer, &content).await {
            Ok(message) => {
                let (mut committed, hint) = match Self::commit(state, temp_id, message.clone()) {
                    Some(Settled { message, hint }) => (message, hint),
                    None => (message, None),
                };
                if hint.is_some() {
                    self.reconcile(state, peer, &mut committed).await;
                }
                tracing::info!(peer = %peer, message_id = %committed.id, status = %committed.status, "message sent");
                if let Some(emitter) = emitter {
                    if let Err(e) = emitter.emit(ClientEvent::NewMessage(committed.clone())) {
                        tracing::debug!(error = %e, "no socket for sender echo");
                    }
                }
                Ok(committed)
            }
            Err(e) => {
                Self::discard(state, peer, temp_id);
                tracing::warn!(peer = %peer, error = %e, "send failed");
                Err(SendError::Api(e))
            }
        }
    }
}

//! Message persistence.
//!
//! [`MessageStore`] is the seam to the durable store: create, list, and
//! status updates by filter. Every status update is guarded by
//! "current status < target", so concurrent delivered and seen updates
//! commute. [`InMemoryStore`] backs the server binary and the tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use pairchat_proto::message::{Message, MessageId, MessageStatus, Timestamp, UserId};
use tokio::sync::RwLock;

/// Errors from the message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("message store unavailable")]
    Unavailable,
}

/// A message about to be persisted. The store assigns id, status and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

/// Selects messages for a status update.
///
/// Always scoped to one receiver; optionally narrowed to one sender or a
/// single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFilter {
    pub receiver_id: UserId,
    pub sender_id: Option<UserId>,
    pub message_id: Option<MessageId>,
}

impl StatusFilter {
    /// All messages addressed to `receiver_id`.
    #[must_use]
    pub const fn addressed_to(receiver_id: UserId) -> Self {
        Self {
            receiver_id,
            sender_id: None,
            message_id: None,
        }
    }

    /// Narrows the filter to messages written by `sender_id`.
    #[must_use]
    pub fn from_sender(mut self, sender_id: UserId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    /// Narrows the filter to a single message.
    #[must_use]
    pub const fn only(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    fn matches(&self, message: &Message) -> bool {
        message.receiver_id == self.receiver_id
            && self
                .sender_id
                .as_ref()
                .is_none_or(|sender| &message.sender_id == sender)
            && self.message_id.is_none_or(|id| message.id == id)
    }
}

/// Durable message storage.
pub trait MessageStore: Send + Sync + 'static {
    /// Persists a new message with status [`MessageStatus::Sent`].
    fn create(&self, draft: MessageDraft)
    -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Looks up a single message.
    fn find(&self, id: MessageId)
    -> impl Future<Output = Result<Option<Message>, StoreError>> + Send;

    /// Lists every message between `a` and `b`, ascending by creation time.
    fn list_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Raises every message matching `filter` whose status is below
    /// `target`, returning the records that changed.
    fn advance_status(
        &self,
        filter: &StatusFilter,
        target: MessageStatus,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Per sender, the number of their messages to `receiver_id` that are
    /// not yet seen. Senders with nothing unseen are omitted.
    fn count_unseen(
        &self,
        receiver_id: &UserId,
    ) -> impl Future<Output = Result<HashMap<UserId, u32>, StoreError>> + Send;
}

/// In-memory [`MessageStore`].
///
/// Messages are kept in insertion order. [`InMemoryStore::set_unavailable`]
/// makes every call fail, for exercising the error paths.
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<Vec<Message>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles simulated unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

impl MessageStore for InMemoryStore {
    async fn create(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        self.check()?;
        let message = Message {
            id: MessageId::new(),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            text: draft.text,
            image_url: draft.image_url,
            status: MessageStatus::Sent,
            created_at: Timestamp::now(),
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.check()?;
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        let mut conversation: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        conversation.sort_by_key(|m| m.created_at);
        Ok(conversation)
    }

    async fn advance_status(
        &self,
        filter: &StatusFilter,
        target: MessageStatus,
    ) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let mut changed = Vec::new();
        for message in messages.iter_mut().filter(|m| filter.matches(m)) {
            if let Some(next) = message.status.advance_to(target) {
                message.status = next;
                changed.push(message.clone());
            }
        }
        drop(messages);
        Ok(changed)
    }

    async fn count_unseen(&self, receiver_id: &UserId) -> Result<HashMap<UserId, u32>, StoreError> {
        self.check()?;
        let mut counts: HashMap<UserId, u32> = HashMap::new();
        for message in self.messages.read().await.iter() {
            if &message.receiver_id == receiver_id && message.status < MessageStatus::Seen {
                *counts.entry(message.sender_id.clone()).or_default() += 1;
            }
        }
        Ok(counts)
    }
}

//! Reconnect reconciliation.
//!
//! When a user's session is registered, every message still `sent` to them
//! is promoted to `delivered` and each affected sender with a live session
//! gets one `delivered` event. Runs off the connection path; failures are
//! logged and never reject the connection.

use std::collections::BTreeSet;
use std::sync::Arc;

use pairchat_proto::event::{Delivered, ServerEvent};
use pairchat_proto::message::{MessageStatus, UserId};
use tokio::task::JoinHandle;

use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, StatusFilter, StoreError};

/// What a reconciliation run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Messages promoted to `delivered`.
    pub promoted: usize,
    /// Senders that received a `delivered` event.
    pub notified: Vec<UserId>,
}

pub struct ReconnectReconciler<S> {
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
}

impl<S> Clone for ReconnectReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: MessageStore> ReconnectReconciler<S> {
    pub const fn new(store: Arc<S>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Promotes `user`'s pending messages and notifies their senders.
    ///
    /// A second run with nothing new finds nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the bulk update fails.
    pub async fn run(&self, user: &UserId) -> Result<ReconcileOutcome, StoreError> {
        let promoted = self
            .store
            .advance_status(
                &StatusFilter::addressed_to(user.clone()),
                MessageStatus::Delivered,
            )
            .await?;

        let senders: BTreeSet<&UserId> = promoted.iter().map(|m| &m.sender_id).collect();
        let mut notified = Vec::new();
        for sender in senders {
            let event = ServerEvent::Delivered(Delivered {
                receiver_id: user.clone(),
            });
            if self.registry.push(sender, event).await {
                notified.push(sender.clone());
            }
        }

        Ok(ReconcileOutcome {
            promoted: promoted.len(),
            notified,
        })
    }

    /// Runs [`Self::run`] on a background task.
    pub fn spawn(&self, user: UserId) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            match reconciler.run(&user).await {
                Ok(outcome) if outcome.promoted > 0 => {
                    tracing::info!(
                        user_id = %user,
                        promoted = outcome.promoted,
                        notified = outcome.notified.len(),
                        "reconciled pending messages"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(user_id = %user, error = %e, "reconnect reconciliation failed");
                }
            }
        })
    }
}

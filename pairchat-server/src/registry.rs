//! Connection registry: which user is reachable through which live session.
//!
//! The [`ConnectionRegistry`] is the single source of truth for presence.
//! It maps each user to at most one session (last connect wins) and holds
//! the sender half of that session's outbound event channel. Every
//! membership change fans the new online set out to all sessions while the
//! write lock is still held, so each broadcast payload equals the key set at
//! the moment of the mutation.

use std::collections::HashMap;

use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::UserId;
use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

use crate::presence;

/// Outbound event channel of one live session.
pub type SessionSender = mpsc::UnboundedSender<ServerEvent>;

/// Fired when a session loses its mapping to a newer one.
pub type ReplacedNotice = oneshot::Sender<()>;

/// Identifies one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh, unique session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionEntry {
    session_id: SessionId,
    sender: SessionSender,
    on_replaced: Option<ReplacedNotice>,
}

/// Maps user ids to their live session.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<UserId, SessionEntry>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `session_id` as the live session of `user_id`.
    ///
    /// Unconditionally replaces any previous mapping and returns the
    /// replaced session id. The replaced session's `on_replaced` notice
    /// fires before its sender is dropped, so its writer can tell a
    /// replacement apart from a shutdown.
    pub async fn register(
        &self,
        user_id: UserId,
        session_id: SessionId,
        sender: SessionSender,
        on_replaced: Option<ReplacedNotice>,
    ) -> Option<SessionId> {
        let mut sessions = self.sessions.write().await;
        let entry = SessionEntry {
            session_id,
            sender,
            on_replaced,
        };
        let replaced = sessions.insert(user_id, entry).map(|old| {
            if let Some(notice) = old.on_replaced {
                let _ = notice.send(());
            }
            old.session_id
        });
        fan_out_presence(&sessions);
        drop(sessions);
        replaced
    }

    /// Removes the mapping for `user_id` if it still points at `session_id`.
    ///
    /// A disconnect from a session that has already been replaced is a
    /// no-op and returns `false`.
    pub async fn unregister(&self, user_id: &UserId, session_id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        if !sessions
            .get(user_id)
            .is_some_and(|entry| entry.session_id == session_id)
        {
            return false;
        }
        sessions.remove(user_id);
        fan_out_presence(&sessions);
        drop(sessions);
        true
    }

    /// Returns the live session of `user_id`, if any.
    pub async fn lookup(&self, user_id: &UserId) -> Option<SessionId> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|entry| entry.session_id)
    }

    /// Returns the current online set, sorted.
    pub async fn online_users(&self) -> Vec<UserId> {
        presence::online_set(self.sessions.read().await.keys())
    }

    /// Pushes `event` to the live session of `user_id`.
    ///
    /// Returns `false` when the user has no session or its channel is
    /// already closed. Neither case is an error: the caller's stored state
    /// is repaired by the next reconnect.
    pub async fn push(&self, user_id: &UserId, event: ServerEvent) -> bool {
        let sessions = self.sessions.read().await;
        let Some(entry) = sessions.get(user_id) else {
            return false;
        };
        if entry.sender.send(event).is_err() {
            tracing::debug!(user_id = %user_id, session_id = %entry.session_id, "push to closing session dropped");
            return false;
        }
        true
    }

    /// Sends `event` to every live session.
    pub async fn broadcast(&self, event: &ServerEvent) {
        let sessions = self.sessions.read().await;
        presence::fan_out(event, sessions.values().map(|entry| &entry.sender));
    }

    /// Drops every session, closing their channels.
    ///
    /// Each session's writer task sees its channel close and shuts the
    /// socket down. Used for graceful shutdown and in tests.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (user_id, entry) in sessions.drain() {
            tracing::info!(user_id = %user_id, session_id = %entry.session_id, "closing session");
        }
    }
}

fn fan_out_presence(sessions: &HashMap<UserId, SessionEntry>) {
    let event = ServerEvent::PresenceSet(presence::online_set(sessions.keys()));
    presence::fan_out(&event, sessions.values().map(|entry| &entry.sender));
}

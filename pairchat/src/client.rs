//! The chat client: one identity, one socket session, one chat state.
//!
//! [`ChatClient`] wires the HTTP API, the socket session, the optimistic
//! queue and the event router together. Inbound events are applied on a
//! background task and summarized as [`ChatUpdate`]s for the UI.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::{Message, OutgoingContent, UserId};
use pairchat_proto::user::{ProfileUpdate, User};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::api::{ApiError, ChatApi};
use crate::config::{ClientConfig, ReconnectConfig};
use crate::outbox::{OptimisticMessageQueue, SendError};
use crate::router::{ChatUpdate, StatusEventRouter};
use crate::session::{ConnectionState, SessionEmitter, SessionError, SessionSlot};
use crate::state::ChatState;

/// Errors surfaced by [`ChatClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no conversation is open")]
    NoOpenConversation,

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Connection settings shared by every identity the client signs in as.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: Url,
    pub reconnect: ReconnectConfig,
    pub channel_capacity: usize,
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            reconnect: config.reconnect.clone(),
            channel_capacity: config.channel_capacity,
        }
    }
}

pub struct ChatClient<A: ChatApi> {
    options: ClientOptions,
    api: Arc<A>,
    queue: OptimisticMessageQueue<A>,
    state: Arc<Mutex<ChatState>>,
    slot: SessionSlot,
    router: Option<JoinHandle<()>>,
    updates: mpsc::Sender<ChatUpdate>,
}

impl<A: ChatApi> ChatClient<A> {
    /// Signs in as `user` and opens the socket session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Session`] if the socket URL is invalid.
    pub async fn start(
        options: ClientOptions,
        user: UserId,
        api: A,
    ) -> Result<(Self, mpsc::Receiver<ChatUpdate>), ClientError> {
        let (updates_tx, updates_rx) = mpsc::channel(options.channel_capacity);
        let api = Arc::new(api);
        let mut client = Self {
            queue: OptimisticMessageQueue::new(Arc::clone(&api)),
            api,
            state: Arc::new(Mutex::new(ChatState::new(user.clone()))),
            slot: SessionSlot::new(),
            router: None,
            updates: updates_tx,
            options,
        };
        client.connect(&user).await?;
        Ok((client, updates_rx))
    }

    async fn connect(&mut self, user: &UserId) -> Result<(), ClientError> {
        let (events_tx, events_rx) = mpsc::channel(self.options.channel_capacity);
        let session = self
            .slot
            .ensure(
                &self.options.server_url,
                user,
                self.options.reconnect.clone(),
                events_tx,
            )
            .await?;
        self.router = Some(spawn_router(
            Arc::clone(&self.state),
            session.emitter(),
            events_rx,
            self.updates.clone(),
        ));
        Ok(())
    }

    #[must_use]
    pub fn me(&self) -> UserId {
        self.state.lock().me().clone()
    }

    /// Shared handle to the chat state.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<ChatState>> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.slot
            .current()
            .map_or(ConnectionState::Disconnected, |session| session.state())
    }

    /// Waits until the socket is connected, or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        match self.slot.current() {
            Some(session) => session.wait_for(ConnectionState::Connected, timeout).await,
            None => false,
        }
    }

    fn emitter(&self) -> Option<SessionEmitter> {
        self.slot.current().map(|session| session.emitter())
    }

    /// Reloads the directory and the unseen counters.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the request fails.
    pub async fn refresh_users(&self) -> Result<(), ApiError> {
        let response = self.api.users().await?;
        self.state
            .lock()
            .set_directory(response.users, response.unseen_messages);
        Ok(())
    }

    /// Opens the conversation with `peer` and loads its history.
    ///
    /// Fetching the history marks the peer's messages as seen on the server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the history request fails. The conversation
    /// stays open in that case.
    pub async fn open(&self, peer: &UserId) -> Result<(), ApiError> {
        self.state.lock().open_conversation(peer.clone());
        let history = self.api.conversation(peer).await?;
        tracing::debug!(peer = %peer, messages = history.len(), "history loaded");
        self.state.lock().load_history(peer, history);
        Ok(())
    }

    pub fn close_conversation(&self) {
        self.state.lock().close_conversation();
    }

    /// Sends `content` to the open conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoOpenConversation`] if nothing is open, or
    /// the send failure.
    pub async fn send(&self, content: OutgoingContent) -> Result<Message, ClientError> {
        let peer = self
            .state
            .lock()
            .open_peer()
            .cloned()
            .ok_or(ClientError::NoOpenConversation)?;
        Ok(self.send_to(&peer, content).await?)
    }

    /// Sends `content` to `peer`, whether or not that conversation is open.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if validation or the request fails.
    pub async fn send_to(
        &self,
        peer: &UserId,
        content: OutgoingContent,
    ) -> Result<Message, SendError> {
        let emitter = self.emitter();
        self.queue
            .send(&self.state, emitter.as_ref(), peer, content)
            .await
    }

    /// Marks everything `peer` sent as seen without fetching history.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the request fails.
    pub async fn mark_seen(&self, peer: &UserId) -> Result<(), ApiError> {
        self.api.mark_seen(peer).await
    }

    /// Updates my profile. Other clients learn about it through the
    /// `profile-updated` broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the request fails.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let user = self.api.update_profile(update).await?;
        tracing::info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    /// Signs in as a different identity.
    ///
    /// The existing session is closed first and the chat state starts
    /// empty. Switching to the current identity keeps everything.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Session`] if the new session cannot start.
    pub async fn switch_user(&mut self, user: UserId, api: A) -> Result<(), ClientError> {
        if self.me() == user {
            return Ok(());
        }
        tracing::info!(from = %self.me(), to = %user, "switching identity");
        self.stop_session().await;

        let api = Arc::new(api);
        self.queue = OptimisticMessageQueue::new(Arc::clone(&api));
        self.api = api;
        self.state = Arc::new(Mutex::new(ChatState::new(user.clone())));
        self.connect(&user).await
    }

    async fn stop_session(&mut self) {
        self.slot.disconnect().await;
        if let Some(router) = self.router.take() {
            // The router ends once the session drops its event sender.
            if let Err(e) = router.await {
                tracing::warn!(error = %e, "event router failed");
            }
        }
    }

    /// Closes the socket session and stops the router.
    pub async fn shutdown(mut self) {
        self.stop_session().await;
    }
}

fn spawn_router(
    state: Arc<Mutex<ChatState>>,
    emitter: SessionEmitter,
    mut events: mpsc::Receiver<ServerEvent>,
    updates: mpsc::Sender<ChatUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let router = StatusEventRouter::new();
        while let Some(event) = events.recv().await {
            tracing::trace!(event = event.name(), "server event");
            let routed = router.apply(&mut state.lock(), event);
            if let Some(reply) = routed.reply {
                if let Err(e) = emitter.emit(reply) {
                    tracing::debug!(error = %e, "reply dropped");
                }
            }
            if let Some(update) = routed.update {
                if updates.try_send(update).is_err() {
                    tracing::debug!("ui update channel full or closed");
                }
            }
        }
    })
}

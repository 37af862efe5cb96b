//! Real-time socket session.
//!
//! A [`ClientSocketSession`] owns one WebSocket connection for one
//! identity. A background supervisor connects, forwards inbound
//! [`ServerEvent`]s, writes outbound [`ClientEvent`]s, and reconnects with
//! exponential backoff when the connection drops. The session itself only
//! exposes connected/disconnected state; the `userId` parameter is sent on
//! every connect attempt. A server close carrying
//! [`REPLACED_CLOSE_CODE`] ends the session for good: another connection for
//! the same user now owns the mapping.
//!
//! [`SessionSlot`] enforces one session per client: connecting as a
//! different identity force-closes the existing session first.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairchat_proto::codec;
use pairchat_proto::event::{ClientEvent, REPLACED_CLOSE_CODE, ServerEvent};
use pairchat_proto::message::UserId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::ReconnectConfig;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Timeout for a single connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the socket session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has been closed; nothing more can be sent.
    #[error("socket session closed")]
    Closed,

    /// The server URL cannot be turned into a socket URL.
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Builds the WebSocket URL for `user_id` from the HTTP base URL.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] if the base URL is not `http(s)`.
pub fn socket_url(server_url: &Url, user_id: &UserId) -> Result<Url, SessionError> {
    let mut url = server_url
        .join("ws")
        .map_err(|e| SessionError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(SessionError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| SessionError::InvalidUrl(format!("cannot switch to {scheme}")))?;
    url.query_pairs_mut().clear().append_pair("userId", user_id.as_str());
    Ok(url)
}

/// Cheap handle for emitting events on a session.
#[derive(Debug, Clone)]
pub struct SessionEmitter {
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl SessionEmitter {
    /// Queues `event` for the socket. Events queued while disconnected are
    /// written after the next successful connect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session has shut down.
    pub fn emit(&self, event: ClientEvent) -> Result<(), SessionError> {
        self.outbound.send(event).map_err(|_| SessionError::Closed)
    }
}

/// One supervised WebSocket connection for one identity.
pub struct ClientSocketSession {
    user_id: UserId,
    state: watch::Receiver<ConnectionState>,
    emitter: SessionEmitter,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl ClientSocketSession {
    /// Starts a session for `user_id`. Inbound events go to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if no socket URL can be derived
    /// from `server_url`.
    pub fn connect(
        server_url: &Url,
        user_id: UserId,
        reconnect: ReconnectConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, SessionError> {
        let url = socket_url(server_url, &user_id)?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let supervisor = tokio::spawn(supervise(Supervisor {
            url,
            user_id: user_id.clone(),
            reconnect,
            events,
            outbound: outbound_rx,
            state: state_tx,
            shutdown: shutdown_rx,
        }));

        Ok(Self {
            user_id,
            state: state_rx,
            emitter: SessionEmitter {
                outbound: outbound_tx,
            },
            shutdown: Some(shutdown_tx),
            supervisor,
        })
    }

    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn emitter(&self) -> SessionEmitter {
        self.emitter.clone()
    }

    /// Queues `event` for the socket.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session has shut down.
    pub fn emit(&self, event: ClientEvent) -> Result<(), SessionError> {
        self.emitter.emit(event)
    }

    /// Waits until the session reports `target`, or `timeout` elapses.
    pub async fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == target))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Closes the connection and stops reconnecting.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.supervisor).await {
            tracing::warn!(user_id = %self.user_id, error = %e, "session supervisor failed");
        }
        tracing::info!(user_id = %self.user_id, "socket session closed");
    }
}

struct Supervisor {
    url: Url,
    user_id: UserId,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<ServerEvent>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: oneshot::Receiver<()>,
}

/// How a live connection ended.
enum Exit {
    /// Close requested, or nobody is listening any more.
    Shutdown,
    /// Another connection for the same user took over; stay down.
    Replaced,
    /// The connection dropped; reconnect.
    Lost,
}

async fn supervise(mut sup: Supervisor) {
    let mut attempt: u32 = 0;
    loop {
        sup.state.send_replace(ConnectionState::Connecting);
        tracing::debug!(user_id = %sup.user_id, attempt, "connecting socket");

        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(sup.url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                sup.state.send_replace(ConnectionState::Connected);
                tracing::info!(user_id = %sup.user_id, "socket connected");
                let connected_at = Instant::now();

                let exit = run_connection(stream, &mut sup).await;
                sup.state.send_replace(ConnectionState::Disconnected);
                match exit {
                    Exit::Shutdown => return,
                    Exit::Replaced => {
                        tracing::warn!(user_id = %sup.user_id, "session replaced by another connection; not reconnecting");
                        return;
                    }
                    Exit::Lost => {}
                }
                tracing::warn!(user_id = %sup.user_id, "socket connection lost");
                if connected_at.elapsed() >= sup.reconnect.stability_threshold {
                    attempt = 0;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(user_id = %sup.user_id, error = %e, "socket connect failed");
                sup.state.send_replace(ConnectionState::Disconnected);
            }
            Err(_) => {
                tracing::warn!(user_id = %sup.user_id, "socket connect timed out");
                sup.state.send_replace(ConnectionState::Disconnected);
            }
        }

        attempt += 1;
        if sup.reconnect.exhausted(attempt) {
            tracing::error!(user_id = %sup.user_id, attempts = attempt - 1, "giving up on reconnect");
            return;
        }
        let delay = sup.reconnect.delay_for(attempt);
        tracing::debug!(user_id = %sup.user_id, delay_ms = delay.as_millis(), "reconnect backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = &mut sup.shutdown => return,
        }
    }
}

async fn run_connection(stream: WsStream, sup: &mut Supervisor) -> Exit {
    let (mut sink, mut reader) = stream.split();
    loop {
        tokio::select! {
            _ = &mut sup.shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Shutdown;
            }
            outbound = sup.outbound.recv() => {
                let Some(event) = outbound else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                };
                match codec::encode_client(&event) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!(error = %e, "socket write failed");
                            return Exit::Lost;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to encode client event"),
                }
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_server(text.as_str()) {
                    Ok(event) => {
                        if sup.events.send(event).await.is_err() {
                            return Exit::Shutdown;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed server frame, skipping"),
                },
                Some(Ok(Message::Close(frame))) => {
                    if frame.is_some_and(|f| u16::from(f.code) == REPLACED_CLOSE_CODE) {
                        return Exit::Replaced;
                    }
                    tracing::info!("socket closed by server");
                    return Exit::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "socket read error");
                    return Exit::Lost;
                }
                None => return Exit::Lost,
            },
        }
    }
}

/// Holds at most one [`ClientSocketSession`].
#[derive(Default)]
pub struct SessionSlot {
    current: Option<ClientSocketSession>,
}

impl SessionSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Ensures a session exists for `user_id`.
    ///
    /// An existing session for the same identity is kept. A session for a
    /// different identity is closed before the new one is started.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the new session cannot start.
    pub async fn ensure(
        &mut self,
        server_url: &Url,
        user_id: &UserId,
        reconnect: ReconnectConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<&ClientSocketSession, SessionError> {
        if self
            .current
            .as_ref()
            .is_some_and(|session| session.user_id() != user_id)
        {
            tracing::info!(user_id = %user_id, "identity changed; closing previous session");
            self.disconnect().await;
        }
        if self.current.is_none() {
            let session =
                ClientSocketSession::connect(server_url, user_id.clone(), reconnect, events)?;
            self.current = Some(session);
        }
        self.current.as_ref().ok_or(SessionError::Closed)
    }

    /// Closes the current session, if any.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.current.take() {
            session.close().await;
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&ClientSocketSession> {
        self.current.as_ref()
    }
}

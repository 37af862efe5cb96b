//! WebSocket session handling.
//!
//! Each upgraded socket gets an outbound event channel and a session id. A
//! socket whose `userId` parameter names a known user is registered in the
//! [`crate::registry::ConnectionRegistry`]; any other socket stays open but
//! never receives pushes and its events are ignored.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pairchat_proto::codec;
use pairchat_proto::event::{ClientEvent, REPLACED_CLOSE_CODE, REPLACED_CLOSE_REASON, ServerEvent};
use pairchat_proto::message::UserId;
use tokio::sync::{mpsc, oneshot};

use crate::registry::SessionId;
use crate::state::ServerState;
use crate::store::MessageStore;

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register the session if `user_id` is recognized.
/// 2. Reconcile the user's pending messages in the background.
/// 3. Run the writer (events and pings) and reader (client events) tasks.
/// 4. On disconnect, unregister if this session is still the live one.
pub async fn handle_socket<S: MessageStore>(
    socket: WebSocket,
    state: Arc<ServerState<S>>,
    user_id: Option<UserId>,
) {
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (notice, replaced) = oneshot::channel();
    let session_id = SessionId::new();

    let user_id = user_id.filter(|id| state.identity.recognizes(id));
    // Anonymous sockets keep their own sender so the writer stays up.
    let _anonymous_sender = match &user_id {
        Some(user) => {
            let registered = state
                .registry
                .register(user.clone(), session_id, tx, Some(notice))
                .await;
            if let Some(old) = registered {
                tracing::info!(user_id = %user, old_session = %old, "replaced existing session");
            }
            tracing::info!(user_id = %user, session_id = %session_id, "session registered");
            state.reconciler.spawn(user.clone());
            None
        }
        None => {
            tracing::info!(session_id = %session_id, "unidentified socket; not registered");
            Some(tx)
        }
    };

    let mut write_task = tokio::spawn(write_loop(ws_sender, rx, replaced, state.ping_interval));

    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let idle_timeout = state.ping_interval.saturating_mul(2);
    let mut read_task = tokio::spawn(async move {
        read_loop(ws_receiver, &reader_state, reader_user.as_ref(), idle_timeout).await;
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if let Some(user) = &user_id {
        if state.registry.unregister(user, session_id).await {
            tracing::info!(user_id = %user, session_id = %session_id, "session closed and unregistered");
        } else {
            tracing::debug!(user_id = %user, session_id = %session_id, "stale session closed");
        }
    }
}

async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    mut replaced: oneshot::Receiver<()>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;
    let mut watching = true;
    loop {
        tokio::select! {
            biased;
            notice = &mut replaced, if watching => {
                watching = false;
                if notice.is_ok() {
                    // Tell the client not to reconnect.
                    let frame = CloseFrame {
                        code: REPLACED_CLOSE_CODE,
                        reason: REPLACED_CLOSE_REASON.into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    // Shut down.
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match codec::encode_server(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(event = event.name(), error = %e, "failed to encode event");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    tracing::warn!("WebSocket write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_loop<S: MessageStore>(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &ServerState<S>,
    user_id: Option<&UserId>,
    idle_timeout: Duration,
) {
    loop {
        let msg = match tokio::time::timeout(idle_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(_) => break,
            Err(_) => {
                tracing::info!("no traffic within idle timeout; closing");
                break;
            }
        };
        match msg {
            Message::Text(text) => handle_text(state, user_id, text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_text<S: MessageStore>(state: &ServerState<S>, user_id: Option<&UserId>, text: &str) {
    let Some(user) = user_id else {
        tracing::debug!("ignoring event from unidentified socket");
        return;
    };
    let event = match codec::decode_client(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(user_id = %user, error = %e, "failed to decode client event");
            return;
        }
    };
    match event {
        ClientEvent::SeenAck(ack) => {
            state.delivery.acknowledge_seen(user, &ack).await;
        }
        ClientEvent::NewMessage(message) => {
            state.delivery.forward_echo(user, &message).await;
        }
    }
}

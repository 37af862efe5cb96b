//! Router assembly and server startup.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};

use crate::config::ServerConfig;
use crate::http;
use crate::state::ServerState;
use crate::store::{InMemoryStore, MessageStore};

/// Builds the full HTTP and WebSocket router over `state`.
pub fn router<S: MessageStore>(state: Arc<ServerState<S>>) -> Router {
    let body_limit = state.max_body_size;
    Router::new()
        .route("/api/messages/users", get(http::users::<S>))
        .route("/api/messages/send/{receiver_id}", post(http::send_message::<S>))
        .route("/api/messages/seen/{peer_id}", patch(http::mark_seen::<S>))
        .route("/api/messages/{peer_id}", get(http::conversation::<S>))
        .route("/api/auth/update-profile", put(http::update_profile::<S>))
        .route("/media/{key}", get(http::media::<S>))
        .route("/ws", get(http::ws_upgrade::<S>))
        .route("/healthz", get(http::healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Starts a server with default configuration and an in-memory store.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let state = ServerState::new(Arc::new(InMemoryStore::new()), &ServerConfig::default());
    start_server_with_state(addr, Arc::new(state)).await
}

/// Starts the server with a pre-built [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore>(
    addr: &str,
    state: Arc<ServerState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts a server on `127.0.0.1:0` with `users` in the directory.
#[cfg(test)]
pub async fn start_test_server(
    users: &[&str],
) -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<()>,
    Arc<ServerState<InMemoryStore>>,
) {
    use pairchat_proto::message::UserId;
    use pairchat_proto::user::User;

    let config = ServerConfig {
        users: users
            .iter()
            .map(|id| User::new(UserId::new(*id), *id))
            .collect(),
        ..ServerConfig::default()
    };
    let state = Arc::new(ServerState::new(Arc::new(InMemoryStore::new()), &config));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, handle, state)
}

// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Session registry and presence over real WebSockets.
//!
//! - the last connection for a user wins; a stale disconnect is ignored
//! - a replaced client stays down instead of taking the mapping back
//! - every presence frame equals the registry's key set
//! - reconnect reconciliation is idempotent
//! - the client reconnects after the server drops its session

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairchat::api::HttpApi;
use pairchat::client::{ChatClient, ClientOptions};
use pairchat::config::ReconnectConfig;
use pairchat::session::{ClientSocketSession, ConnectionState};
use pairchat_proto::codec;
use pairchat_proto::event::ServerEvent;
use pairchat_proto::message::{MessageStatus, OutgoingContent, UserId};
use pairchat_proto::user::User;
use pairchat_server::config::ServerConfig;
use pairchat_server::server::start_server_with_state;
use pairchat_server::state::ServerState;
use pairchat_server::store::{InMemoryStore, MessageDraft, MessageStore};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Helpers
// =============================================================================

fn alice() -> UserId {
    UserId::new("alice")
}

fn bob() -> UserId {
    UserId::new("bob")
}

async fn start_server(users: &[&str]) -> (std::net::SocketAddr, Arc<ServerState<InMemoryStore>>) {
    let config = ServerConfig {
        users: users
            .iter()
            .map(|id| User::new(UserId::new(*id), *id))
            .collect(),
        ..ServerConfig::default()
    };
    let state = Arc::new(ServerState::new(Arc::new(InMemoryStore::new()), &config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr, user: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?userId={user}"))
        .await
        .unwrap();
    socket
}

/// Reads the next server event, skipping control frames.
async fn next_event(socket: &mut Socket) -> Option<ServerEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return codec::decode_server(text.as_str()).ok(),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .unwrap()
}

/// Reads until a presence frame arrives.
async fn next_presence(socket: &mut Socket) -> Vec<UserId> {
    loop {
        match next_event(socket).await {
            Some(ServerEvent::PresenceSet(online)) => return online,
            Some(_) => {}
            None => panic!("socket closed before presence"),
        }
    }
}

async fn wait_registered(state: &ServerState<InMemoryStore>, user: &UserId) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.registry.lookup(user).await.is_none() {
        assert!(Instant::now() < deadline, "{user} never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn last_connect_wins_and_stale_disconnect_is_ignored() {
    let (addr, state) = start_server(&["alice", "bob"]).await;

    let mut first = connect(addr, "alice").await;
    assert_eq!(next_presence(&mut first).await, vec![alice()]);
    let first_session = state.registry.lookup(&alice()).await.unwrap();

    let mut second = connect(addr, "alice").await;
    assert_eq!(next_presence(&mut second).await, vec![alice()]);
    let second_session = state.registry.lookup(&alice()).await.unwrap();
    assert_ne!(first_session, second_session);

    // The replaced socket is closed by the server.
    while next_event(&mut first).await.is_some() {}
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(state.registry.lookup(&alice()).await, Some(second_session));
    assert_eq!(state.registry.online_users().await, vec![alice()]);

    second.close(None).await.unwrap();
}

#[tokio::test]
async fn replaced_client_does_not_reconnect() {
    let (addr, state) = start_server(&["alice"]).await;
    let server_url = Url::parse(&format!("http://{addr}")).unwrap();
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        max_attempts: 0,
        stability_threshold: Duration::from_secs(5),
    };
    let (events1, _rx1) = mpsc::channel(64);
    let (events2, _rx2) = mpsc::channel(64);

    let first =
        ClientSocketSession::connect(&server_url, alice(), reconnect.clone(), events1).unwrap();
    assert!(first.wait_for(ConnectionState::Connected, Duration::from_secs(5)).await);
    wait_registered(&state, &alice()).await;
    let first_session = state.registry.lookup(&alice()).await.unwrap();

    let second = ClientSocketSession::connect(&server_url, alice(), reconnect, events2).unwrap();
    assert!(second.wait_for(ConnectionState::Connected, Duration::from_secs(5)).await);
    let deadline = Instant::now() + Duration::from_secs(5);
    let second_session = loop {
        match state.registry.lookup(&alice()).await {
            Some(session) if session != first_session => break session,
            _ => {}
        }
        assert!(Instant::now() < deadline, "second session never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert!(first.wait_for(ConnectionState::Disconnected, Duration::from_secs(5)).await);

    // Many backoff periods later the mapping has not moved.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(first.state(), ConnectionState::Disconnected);
    assert_eq!(second.state(), ConnectionState::Connected);
    assert_eq!(state.registry.lookup(&alice()).await, Some(second_session));

    second.close().await;
    first.close().await;
}

#[tokio::test]
async fn presence_frames_match_registry() {
    let (addr, state) = start_server(&["alice", "bob"]).await;

    let mut a = connect(addr, "alice").await;
    assert_eq!(next_presence(&mut a).await, vec![alice()]);

    let mut b = connect(addr, "bob").await;
    assert_eq!(next_presence(&mut b).await, vec![alice(), bob()]);
    assert_eq!(next_presence(&mut a).await, vec![alice(), bob()]);
    assert_eq!(state.registry.online_users().await, vec![alice(), bob()]);

    b.close(None).await.unwrap();
    assert_eq!(next_presence(&mut a).await, vec![alice()]);
    assert_eq!(state.registry.online_users().await, vec![alice()]);

    a.close(None).await.unwrap();
}

#[tokio::test]
async fn unrecognized_user_is_never_registered() {
    let (addr, state) = start_server(&["alice"]).await;

    let mut stranger = connect(addr, "mallory").await;
    let mut a = connect(addr, "alice").await;
    assert_eq!(next_presence(&mut a).await, vec![alice()]);

    // The stranger's socket stays open but receives nothing.
    let quiet = tokio::time::timeout(Duration::from_millis(200), stranger.next()).await;
    assert!(quiet.is_err());
    assert_eq!(state.registry.online_users().await, vec![alice()]);

    stranger.send(WsMessage::Close(None)).await.unwrap();
    a.close(None).await.unwrap();
}

#[tokio::test]
async fn reconcile_runs_once_per_backlog() {
    let (addr, state) = start_server(&["alice", "bob"]).await;
    let mut a = connect(addr, "alice").await;
    assert_eq!(next_presence(&mut a).await, vec![alice()]);

    for text in ["one", "two"] {
        state
            .store
            .create(MessageDraft {
                sender_id: alice(),
                receiver_id: bob(),
                text: Some(text.to_string()),
                image_url: None,
            })
            .await
            .unwrap();
    }

    let outcome = state.reconciler.run(&bob()).await.unwrap();
    assert_eq!(outcome.promoted, 2);
    assert_eq!(outcome.notified, vec![alice()]);

    let again = state.reconciler.run(&bob()).await.unwrap();
    assert_eq!(again.promoted, 0);
    assert!(again.notified.is_empty());

    // Alice hears about it exactly once.
    loop {
        match next_event(&mut a).await {
            Some(ServerEvent::Delivered(delivered)) => {
                assert_eq!(delivered.receiver_id, bob());
                break;
            }
            Some(_) => {}
            None => panic!("socket closed"),
        }
    }
    let extra = tokio::time::timeout(Duration::from_millis(200), next_event(&mut a)).await;
    assert!(extra.is_err(), "unexpected second event: {extra:?}");

    let history = state.store.list_between(&alice(), &bob()).await.unwrap();
    assert!(history.iter().all(|m| m.status == MessageStatus::Delivered));

    a.close(None).await.unwrap();
}

#[tokio::test]
async fn client_reconnects_after_server_drops_sessions() {
    let (addr, state) = start_server(&["alice", "bob"]).await;
    let server_url = Url::parse(&format!("http://{addr}")).unwrap();
    let options = ClientOptions {
        server_url: server_url.clone(),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_attempts: 0,
            stability_threshold: Duration::from_secs(5),
        },
        channel_capacity: 64,
    };
    let (client, _updates) =
        ChatClient::start(options, alice(), HttpApi::new(server_url, "alice"))
            .await
            .unwrap();
    wait_registered(&state, &alice()).await;
    let before = state.registry.lookup(&alice()).await.unwrap();

    state.close_all_sessions().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = state.registry.lookup(&alice()).await;
        if current.is_some_and(|session| session != before) {
            break;
        }
        assert!(Instant::now() < deadline, "client never reconnected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(client.wait_connected(Duration::from_secs(5)).await);
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    // Requests keep working on the new session; Bob is offline.
    let sent = client
        .send_to(&bob(), OutgoingContent::text("still here"))
        .await
        .unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    client.shutdown().await;
}

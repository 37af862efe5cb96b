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

//! Optimistic send settlement against a real server.
//!
//! After a send settles the conversation holds exactly one entry carrying
//! the server's id (success) or no entry at all (failure). A response that
//! arrives after the user moved to another conversation still lands in the
//! conversation it was issued for.

use std::sync::Arc;
use std::time::Duration;

use pairchat::api::{ApiError, ChatApi, HttpApi};
use pairchat::client::{ChatClient, ClientError, ClientOptions};
use pairchat::config::ReconnectConfig;
use pairchat::outbox::SendError;
use pairchat::router::ChatUpdate;
use pairchat::state::{ChatState, Entry};
use pairchat_proto::api::UsersResponse;
use pairchat_proto::message::{Message, OutgoingContent, UserId, ValidationError};
use pairchat_proto::user::{ProfileUpdate, User};
use pairchat_server::config::ServerConfig;
use pairchat_server::server::start_server_with_state;
use pairchat_server::state::ServerState;
use pairchat_server::store::{InMemoryStore, MessageDraft, MessageStore};
use tokio::sync::{Semaphore, mpsc};
use url::Url;

// =============================================================================
// Helpers
// =============================================================================

fn alice() -> UserId {
    UserId::new("alice")
}

fn bob() -> UserId {
    UserId::new("bob")
}

async fn start_server(users: &[&str]) -> (Url, Arc<ServerState<InMemoryStore>>) {
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
    (Url::parse(&format!("http://{addr}")).unwrap(), state)
}

fn carol() -> UserId {
    UserId::new("carol")
}

fn options(server_url: &Url) -> ClientOptions {
    ClientOptions {
        server_url: server_url.clone(),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_attempts: 0,
            stability_threshold: Duration::from_secs(5),
        },
        channel_capacity: 64,
    }
}

async fn start_client(
    server_url: &Url,
    user: &UserId,
) -> (ChatClient<HttpApi>, mpsc::Receiver<ChatUpdate>) {
    let api = HttpApi::new(server_url.clone(), user.as_str());
    ChatClient::start(options(server_url), user.clone(), api)
        .await
        .unwrap()
}

/// Holds every request about `held` until the gate gets a permit.
struct HeldApi {
    inner: HttpApi,
    held: UserId,
    gate: Arc<Semaphore>,
}

impl HeldApi {
    async fn pass(&self, peer: &UserId) {
        if peer == &self.held {
            let _permit = self.gate.acquire().await.unwrap();
        }
    }
}

impl ChatApi for HeldApi {
    async fn send_message(
        &self,
        receiver: &UserId,
        content: &OutgoingContent,
    ) -> Result<Message, ApiError> {
        self.pass(receiver).await;
        self.inner.send_message(receiver, content).await
    }

    async fn conversation(&self, peer: &UserId) -> Result<Vec<Message>, ApiError> {
        self.pass(peer).await;
        self.inner.conversation(peer).await
    }

    async fn users(&self) -> Result<UsersResponse, ApiError> {
        self.inner.users().await
    }

    async fn mark_seen(&self, peer: &UserId) -> Result<(), ApiError> {
        self.inner.mark_seen(peer).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.inner.update_profile(update).await
    }
}

async fn start_held_client(
    server_url: &Url,
    user: &UserId,
    held: &UserId,
) -> (ChatClient<HeldApi>, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let api = HeldApi {
        inner: HttpApi::new(server_url.clone(), user.as_str()),
        held: held.clone(),
        gate: Arc::clone(&gate),
    };
    let (client, _updates) = ChatClient::start(options(server_url), user.clone(), api)
        .await
        .unwrap();
    (client, gate)
}

async fn seed(
    server: &ServerState<InMemoryStore>,
    from: UserId,
    to: UserId,
    text: &str,
) -> Message {
    server
        .store
        .create(MessageDraft {
            sender_id: from,
            receiver_id: to,
            text: Some(text.to_string()),
            image_url: None,
        })
        .await
        .unwrap()
}

/// Polls `check` against the client state until it holds.
async fn until<A: ChatApi>(client: &ChatClient<A>, check: impl Fn(&ChatState) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check(&*client.state().lock()) {
        assert!(tokio::time::Instant::now() < deadline, "state never settled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_registered(state: &ServerState<InMemoryStore>, user: &UserId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.registry.lookup(user).await.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "{user} never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn successful_send_leaves_one_entry_with_server_id() {
    let (url, _server) = start_server(&["alice", "bob"]).await;
    let (a, _updates) = start_client(&url, &alice()).await;

    a.open(&bob()).await.unwrap();
    let first = a.send(OutgoingContent::text("one")).await.unwrap();
    let second = a.send(OutgoingContent::text("two")).await.unwrap();

    let state = a.state();
    let state = state.lock();
    let entries = state.conversation(&bob());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message_id(), Some(first.id));
    assert_eq!(entries[1].message_id(), Some(second.id));
    assert!(entries.iter().all(|e| !e.is_pending()));
    drop(state);

    a.shutdown().await;
}

#[tokio::test]
async fn unknown_receiver_leaves_no_entry() {
    let (url, _server) = start_server(&["alice", "bob"]).await;
    let (a, _updates) = start_client(&url, &alice()).await;
    let zed = UserId::new("zed");

    let err = a
        .send_to(&zed, OutgoingContent::text("hello?"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, SendError::Api(ApiError::Rejected { status: 404, .. })),
        "unexpected error: {err}"
    );
    assert!(a.state().lock().conversation(&zed).is_empty());

    a.shutdown().await;
}

#[tokio::test]
async fn store_failure_discards_the_placeholder() {
    let (url, server) = start_server(&["alice", "bob"]).await;
    let (a, _updates) = start_client(&url, &alice()).await;

    server.store.set_unavailable(true);
    let err = a
        .send_to(&bob(), OutgoingContent::text("lost"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SendError::Api(ApiError::Rejected { status: 500, .. })
    ));
    assert!(a.state().lock().conversation(&bob()).is_empty());

    // No automatic retry: recovery needs a new send.
    server.store.set_unavailable(false);
    let sent = a
        .send_to(&bob(), OutgoingContent::text("found"))
        .await
        .unwrap();
    let state = a.state();
    let state = state.lock();
    let entries = state.conversation(&bob());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message_id(), Some(sent.id));
    assert_eq!(entries[0].text(), Some("found"));
    drop(state);

    a.shutdown().await;
}

#[tokio::test]
async fn late_send_response_lands_in_its_own_conversation() {
    let (url, server) = start_server(&["alice", "bob", "carol"]).await;
    let from_carol = seed(&server, carol(), alice(), "hi alice").await;
    let (a, gate) = start_held_client(&url, &alice(), &bob()).await;

    let bob_peer = bob();
    let (sent, carol_before) = tokio::join!(a.send_to(&bob_peer, OutgoingContent::text("to bob")), async {
        until(&a, |s| s.conversation(&bob()).iter().any(Entry::is_pending)).await;
        a.open(&carol()).await.unwrap();
        let before = a.state().lock().conversation(&carol()).to_vec();
        gate.add_permits(1);
        before
    });
    let sent = sent.unwrap();

    let state = a.state();
    let state = state.lock();
    assert_eq!(state.open_peer(), Some(&carol()));
    let to_bob = state.conversation(&bob());
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0].message_id(), Some(sent.id));
    assert!(!to_bob[0].is_pending());
    assert_eq!(state.conversation(&carol()), carol_before.as_slice());
    assert_eq!(carol_before.len(), 1);
    assert_eq!(carol_before[0].message_id(), Some(from_carol.id));
    drop(state);

    a.shutdown().await;
}

#[tokio::test]
async fn late_history_lands_in_its_own_conversation() {
    let (url, server) = start_server(&["alice", "bob", "carol"]).await;
    let from_bob = seed(&server, bob(), alice(), "hi from bob").await;
    let from_carol = seed(&server, carol(), alice(), "hi from carol").await;
    let (a, gate) = start_held_client(&url, &alice(), &bob()).await;

    let bob_peer = bob();
    let (bob_opened, ()) = tokio::join!(a.open(&bob_peer), async {
        until(&a, |s| s.is_open(&bob())).await;
        a.open(&carol()).await.unwrap();
        gate.add_permits(1);
    });
    bob_opened.unwrap();

    let state = a.state();
    let state = state.lock();
    assert_eq!(state.open_peer(), Some(&carol()));
    let with_bob: Vec<_> = state.conversation(&bob()).iter().map(Entry::message_id).collect();
    assert_eq!(with_bob, vec![Some(from_bob.id)]);
    let with_carol: Vec<_> = state.conversation(&carol()).iter().map(Entry::message_id).collect();
    assert_eq!(with_carol, vec![Some(from_carol.id)]);
    drop(state);

    a.shutdown().await;
}

#[tokio::test]
async fn blank_message_is_rejected_locally() {
    let (url, _server) = start_server(&["alice", "bob"]).await;
    let (a, _updates) = start_client(&url, &alice()).await;

    a.open(&bob()).await.unwrap();
    let err = a.send(OutgoingContent::text("  ")).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Send(SendError::Invalid(ValidationError::Empty))
    ));
    assert!(a.state().lock().conversation(&bob()).is_empty());

    a.shutdown().await;
}

#[tokio::test]
async fn send_without_open_conversation_fails() {
    let (url, _server) = start_server(&["alice", "bob"]).await;
    let (a, _updates) = start_client(&url, &alice()).await;

    let err = a.send(OutgoingContent::text("hi")).await.unwrap_err();
    assert!(matches!(err, ClientError::NoOpenConversation));

    a.shutdown().await;
}

#[tokio::test]
async fn unknown_credential_is_unauthorized() {
    let (url, _server) = start_server(&["alice", "bob"]).await;
    let api = HttpApi::new(url, "mallory");

    let err = api.users().await.unwrap_err();
    match err {
        ApiError::Rejected { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Not authorized - invalid token");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn profile_update_reaches_other_clients() {
    let (url, server) = start_server(&["alice", "bob"]).await;
    let (a, _a_updates) = start_client(&url, &alice()).await;
    let (b, mut b_updates) = start_client(&url, &bob()).await;
    wait_registered(&server, &bob()).await;
    b.refresh_users().await.unwrap();

    let update = ProfileUpdate {
        full_name: Some("Alice Liddell".to_string()),
        bio: Some("down the rabbit hole".to_string()),
        profile_pic: None,
    };
    let user = a.update_profile(&update).await.unwrap();
    assert_eq!(user.full_name, "Alice Liddell");

    let profile = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match b_updates.recv().await {
                Some(ChatUpdate::Profile(user)) => break user,
                Some(_) => {}
                None => panic!("update channel closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(profile, user);
    assert_eq!(
        b.state().lock().user(&alice()).map(|u| u.bio.clone()),
        Some("down the rabbit hole".to_string())
    );

    a.shutdown().await;
    b.shutdown().await;
}

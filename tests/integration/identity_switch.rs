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

//! One socket session per client across identity changes.

use std::sync::Arc;
use std::time::Duration;

use pairchat::api::HttpApi;
use pairchat::client::{ChatClient, ClientOptions};
use pairchat::config::ReconnectConfig;
use pairchat::session::ConnectionState;
use pairchat_proto::message::{OutgoingContent, UserId};
use pairchat_proto::user::User;
use pairchat_server::config::ServerConfig;
use pairchat_server::server::start_server_with_state;
use pairchat_server::state::ServerState;
use pairchat_server::store::InMemoryStore;
use tokio::time::Instant;
use url::Url;

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

async fn wait_online(state: &ServerState<InMemoryStore>, expected: &[UserId]) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if state.registry.online_users().await == expected {
            return;
        }
        assert!(Instant::now() < deadline, "online set never became {expected:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn switching_identity_replaces_the_session() {
    let (url, server) = start_server(&["alice", "bob", "carol"]).await;
    let (mut client, _updates) =
        ChatClient::start(options(&url), alice(), HttpApi::new(url.clone(), "alice"))
            .await
            .unwrap();
    wait_online(&server, &[alice()]).await;

    client
        .send_to(&bob(), OutgoingContent::text("from alice"))
        .await
        .unwrap();
    assert_eq!(client.state().lock().conversation(&bob()).len(), 1);

    client
        .switch_user(bob(), HttpApi::new(url.clone(), "bob"))
        .await
        .unwrap();
    assert_eq!(client.me(), bob());
    // State starts over for the new identity.
    assert!(client.state().lock().conversation(&bob()).is_empty());
    wait_online(&server, &[bob()]).await;
    assert!(client.wait_connected(Duration::from_secs(5)).await);

    // Requests now carry Bob's credential.
    client.refresh_users().await.unwrap();
    let state = client.state();
    let names: Vec<UserId> = state.lock().users().map(|u| u.id.clone()).collect();
    assert_eq!(names, vec![alice(), UserId::new("carol")]);
    assert_eq!(state.lock().unseen(&alice()), 1);

    client.shutdown().await;
    wait_online(&server, &[]).await;
}

#[tokio::test]
async fn switching_to_the_same_identity_keeps_the_session() {
    let (url, server) = start_server(&["alice", "bob"]).await;
    let (mut client, _updates) =
        ChatClient::start(options(&url), alice(), HttpApi::new(url.clone(), "alice"))
            .await
            .unwrap();
    wait_online(&server, &[alice()]).await;
    let session = server.registry.lookup(&alice()).await.unwrap();

    client
        .switch_user(alice(), HttpApi::new(url.clone(), "alice"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.lookup(&alice()).await, Some(session));
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.shutdown().await;
}

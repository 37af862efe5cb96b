//! `PairChat` line-oriented direct messaging client.
//!
//! Type a line to send it to the open conversation. Commands start with `/`:
//!
//! ```text
//! /users                  list peers with presence and unseen counts
//! /open <peer>            open a conversation and load its history
//! /close                  close the open conversation
//! /image <url-or-data>    send an image to the open conversation
//! /profile <name|bio|pic> <value>
//! /login <user> [token]   sign in as someone else
//! /quit
//! ```
//!
//! ```bash
//! cargo run --bin pairchat -- --server-url http://127.0.0.1:5001 --user-id alice
//! PAIRCHAT_USER=bob cargo run --bin pairchat
//! ```

use std::io;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use pairchat::api::HttpApi;
use pairchat::client::{ChatClient, ClientOptions};
use pairchat::config::{CliArgs, ClientConfig};
use pairchat::router::ChatUpdate;
use pairchat::state::Entry;
use pairchat_proto::message::{OutgoingContent, UserId};
use pairchat_proto::user::ProfileUpdate;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Logs go to a file so stdout stays free for the conversation.
    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    let (Some(user_id), Some(credential)) = (config.user_id.clone(), config.credential()) else {
        eprintln!("No user id configured. Pass --user-id or set PAIRCHAT_USER.");
        std::process::exit(2);
    };

    tracing::info!(user_id = %user_id, server = %config.server_url, "pairchat starting");
    let api = HttpApi::new(config.server_url.clone(), credential);
    let (mut client, mut updates) =
        match ChatClient::start(ClientOptions::from(&config), UserId::new(user_id), api).await {
            Ok(started) => started,
            Err(e) => {
                eprintln!("Failed to start: {e}");
                std::process::exit(1);
            }
        };

    if !client.wait_connected(Duration::from_secs(5)).await {
        println!("(not connected yet; retrying in the background)");
    }
    if let Err(e) = client.refresh_users().await {
        println!("! could not load users: {e}");
    }
    print_users(&client);

    let result = run(&mut client, &mut updates, &config).await;

    client.shutdown().await;
    tracing::info!("pairchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pairchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(
    client: &mut ChatClient<HttpApi>,
    updates: &mut mpsc::Receiver<ChatUpdate>,
    config: &ClientConfig,
) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                if !handle_line(client, line.trim(), config).await {
                    return Ok(());
                }
            }
            Some(update) = updates.recv() => print_update(client, &update),
        }
    }
}

/// Runs one input line. Returns `false` when the user asked to quit.
async fn handle_line(client: &mut ChatClient<HttpApi>, line: &str, config: &ClientConfig) -> bool {
    if line.is_empty() {
        return true;
    }
    let Some(command) = line.strip_prefix('/') else {
        if let Err(e) = client.send(OutgoingContent::text(line)).await {
            println!("! {e}");
        }
        return true;
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "quit" | "q" => return false,
        "users" => {
            if let Err(e) = client.refresh_users().await {
                println!("! {e}");
            }
            print_users(client);
        }
        "open" if !rest.is_empty() => {
            let peer = UserId::new(rest);
            match client.open(&peer).await {
                Ok(()) => print_conversation(client, &peer),
                Err(e) => println!("! {e}"),
            }
        }
        "close" => client.close_conversation(),
        "image" if !rest.is_empty() => {
            if let Err(e) = client.send(OutgoingContent::image(rest)).await {
                println!("! {e}");
            }
        }
        "profile" => {
            let (field, value) = rest.split_once(' ').unwrap_or((rest, ""));
            let value = Some(value.trim().to_string());
            let update = match field {
                "name" => ProfileUpdate { full_name: value, ..ProfileUpdate::default() },
                "bio" => ProfileUpdate { bio: value, ..ProfileUpdate::default() },
                "pic" => ProfileUpdate { profile_pic: value, ..ProfileUpdate::default() },
                _ => {
                    println!("usage: /profile <name|bio|pic> <value>");
                    return true;
                }
            };
            match client.update_profile(&update).await {
                Ok(user) => println!("* profile saved: {}", user.full_name),
                Err(e) => println!("! {e}"),
            }
        }
        "login" if !rest.is_empty() => {
            let (user, token) = rest.split_once(' ').unwrap_or((rest, rest));
            let api = HttpApi::new(config.server_url.clone(), token.trim());
            match client.switch_user(UserId::new(user), api).await {
                Ok(()) => {
                    println!("* signed in as {user}");
                    if let Err(e) = client.refresh_users().await {
                        println!("! {e}");
                    }
                    print_users(client);
                }
                Err(e) => println!("! {e}"),
            }
        }
        _ => println!("unknown command: /{name}"),
    }
    true
}

fn print_users(client: &ChatClient<HttpApi>) {
    let state = client.state();
    let state = state.lock();
    for user in state.users() {
        let marker = if state.is_online(&user.id) { "*" } else { " " };
        let unseen = state.unseen(&user.id);
        if unseen > 0 {
            println!("{marker} {} ({}) [{unseen} new]", user.full_name, user.id);
        } else {
            println!("{marker} {} ({})", user.full_name, user.id);
        }
    }
}

fn print_conversation(client: &ChatClient<HttpApi>, peer: &UserId) {
    let state = client.state();
    let state = state.lock();
    println!("--- {peer} ---");
    for entry in state.conversation(peer) {
        println!("{}", format_entry(state.me(), entry));
    }
}

fn print_update(client: &ChatClient<HttpApi>, update: &ChatUpdate) {
    let state = client.state();
    let state = state.lock();
    match update {
        ChatUpdate::Message { peer } => {
            if let Some(entry) = state.conversation(peer).last() {
                println!("{}", format_entry(state.me(), entry));
            }
        }
        ChatUpdate::Unseen { peer, count } => println!("* {peer} sent a message ({count} unseen)"),
        ChatUpdate::Status { peer, status } => println!("* {peer}: {status}"),
        ChatUpdate::Presence(online) => {
            let names: Vec<&str> = online.iter().map(UserId::as_str).collect();
            println!("* online: {}", names.join(", "));
        }
        ChatUpdate::Profile(user) => println!("* {} updated their profile", user.id),
    }
}

fn format_entry(me: &UserId, entry: &Entry) -> String {
    let body = match entry {
        Entry::Pending(pending) => pending
            .content
            .text
            .clone()
            .unwrap_or_else(|| "[image]".to_string()),
        Entry::Committed(message) => match (&message.text, &message.image_url) {
            (Some(text), _) => text.clone(),
            (None, Some(url)) => format!("[image {url}]"),
            (None, None) => String::new(),
        },
    };
    match entry {
        Entry::Committed(message) if &message.sender_id != me => {
            format!("{}: {body}", message.sender_id)
        }
        _ => format!("me: {body} ({})", entry.status()),
    }
}

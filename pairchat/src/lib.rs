//! `PairChat` client library.
//!
//! Talks to a `pairchat-server` over HTTP for requests and over a WebSocket
//! session for presence, new messages and delivery receipts.

pub mod api;
pub mod client;
pub mod config;
pub mod outbox;
pub mod router;
pub mod session;
pub mod state;

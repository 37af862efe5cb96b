//! `PairChat` server library.
//!
//! Tracks which users are connected, pushes presence and delivery-status
//! events over WebSocket sessions, and serves the message HTTP API.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod http;
pub mod identity;
pub mod media;
pub mod presence;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod state;
pub mod store;
pub mod ws;

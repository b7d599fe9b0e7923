//! Game-server management agent.
//!
//! Reconstructs a live model of the connected clients by following the game
//! server's log file and reconciling what the log claims against the
//! authoritative player list fetched over the remote console. Parsed lines
//! become typed [`events::GameEvent`]s once the clients involved are known.

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod registry;
pub mod status;

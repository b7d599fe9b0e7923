//! Remote-console (RCON) transport layer for quake-derived game servers.
//!
//! The game server exposes a single datagram channel that is reused for every
//! administrative exchange. This crate provides:
//!
//! - **Wire framing** (`codec`): the 0xFF-prefixed request/reply format shared
//!   by the authenticated and password-less dialects.
//! - **Datagram transport** (`transport`): a retrying, timeout-bound
//!   request/response exchange plus a fire-and-forget command queue drained by
//!   a background worker. Commands that must never be re-sent (quit, map
//!   changes) are detected and get exactly one attempt.
//! - **Handshake transport** (`handshake`): the TCP variant used by engines
//!   that require an authentication handshake before accepting commands.
//! - **Status cache** (`cache`): a time-boxed memoization layer in front of
//!   the bulk player-status command, shared by all callers.
//!
//! Transient transport trouble (timeouts, socket errors) is never surfaced as
//! an error; callers receive `None` and decide whether to retry at their own
//! layer. Only credential failures on the handshake transport are fatal.

pub mod cache;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod transport;

pub use cache::StatusCache;
pub use error::RconError;
pub use handshake::HandshakeTransport;
pub use transport::{Classification, CommandTransport, RconCommand, RconTransport};

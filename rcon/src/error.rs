use thiserror::Error;

/// Errors surfaced by the RCON transports.
///
/// Transient datagram trouble (timeouts, dropped packets) never appears here:
/// the datagram transport reports those as `None` responses after its retry
/// policy is exhausted. Only the handshake transport produces errors, and a
/// [`RconError::BadPassword`] is fatal for the whole connection.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad rcon password")]
    BadPassword,

    #[error("rcon authentication rejected: {0}")]
    AuthRejected(String),

    #[error("connection closed by server")]
    ConnectionClosed,
}

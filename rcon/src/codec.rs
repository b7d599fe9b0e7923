//! Wire framing for the connectionless RCON dialects.
//!
//! Requests are four 0xFF bytes followed by either `rcon "PASSWORD" CMD\n`
//! (authenticated dialect) or the bare command text (query dialect). Replies
//! carry a `\xFF\xFF\xFF\xFFprint\n` prefix in front of the payload; long
//! replies span several datagrams and each one repeats the prefix, so every
//! occurrence is stripped.

/// Connectionless packet header shared by both dialects.
pub const HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// Prefix the server prepends to every reply datagram.
pub const REPLY_PREFIX: &[u8] = b"\xff\xff\xff\xffprint\n";

/// Frames an authenticated RCON request.
pub fn frame_rcon(password: &str, command: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER.len() + password.len() + command.len() + 10);
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(b"rcon \"");
    frame.extend_from_slice(password.as_bytes());
    frame.extend_from_slice(b"\" ");
    frame.extend_from_slice(command.as_bytes());
    frame.push(b'\n');
    frame
}

/// Frames a password-less server query.
pub fn frame_query(command: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER.len() + command.len() + 1);
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(command.as_bytes());
    frame.push(b'\n');
    frame
}

/// Strips every reply prefix from a received datagram and decodes the payload.
pub fn strip_reply(mut data: &[u8]) -> String {
    let mut payload = Vec::with_capacity(data.len());
    while !data.is_empty() {
        if data.starts_with(REPLY_PREFIX) {
            data = &data[REPLY_PREFIX.len()..];
        } else {
            payload.push(data[0]);
            data = &data[1..];
        }
    }
    String::from_utf8_lossy(&payload).into_owned()
}

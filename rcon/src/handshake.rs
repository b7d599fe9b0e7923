//! TCP transport for engines that require an authentication handshake.
//!
//! Packets are length-prefixed little-endian frames: `size`, `id`, `type`,
//! a NUL-terminated body and a trailing NUL. The transport authenticates once
//! at connect time; on any later send/receive failure it performs exactly one
//! reconnect-and-reauthenticate cycle before surfacing the error. A rejected
//! password is fatal and never retried.

use crate::error::RconError;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

pub(crate) fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let size = (body.len() + 10) as i32;
    let mut frame = Vec::with_capacity(body.len() + 14);
    frame.extend_from_slice(&size.to_le_bytes());
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(&kind.to_le_bytes());
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame
}

pub(crate) async fn read_packet(
    stream: &mut TcpStream,
    reply_timeout: Duration,
) -> Result<Packet, RconError> {
    let mut header = [0u8; 4];
    timeout(reply_timeout, stream.read_exact(&mut header))
        .await
        .map_err(|_| {
            RconError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for reply packet",
            ))
        })??;
    let size = i32::from_le_bytes(header) as usize;
    if !(10..=65536).contains(&size) {
        return Err(RconError::ConnectionClosed);
    }

    let mut frame = vec![0u8; size];
    timeout(reply_timeout, stream.read_exact(&mut frame))
        .await
        .map_err(|_| {
            RconError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out reading reply body",
            ))
        })??;

    let id = i32::from_le_bytes(frame[0..4].try_into().unwrap());
    let kind = i32::from_le_bytes(frame[4..8].try_into().unwrap());
    let body = String::from_utf8_lossy(&frame[8..size - 2]).into_owned();
    Ok(Packet { id, kind, body })
}

struct Connection {
    stream: TcpStream,
    next_id: i32,
}

impl Connection {
    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

/// RCON over a handshake-authenticated TCP connection.
pub struct HandshakeTransport {
    addr: String,
    password: String,
    reply_timeout: Duration,
    conn: Mutex<Connection>,
}

impl HandshakeTransport {
    /// Connects and authenticates. A rejected password fails here and must
    /// not be retried by the caller.
    pub async fn connect(
        addr: &str,
        password: &str,
        reply_timeout: Duration,
    ) -> Result<Self, RconError> {
        info!("rcon {}: connecting handshake transport", addr);
        let conn = Self::open(addr, password, reply_timeout).await?;
        Ok(Self {
            addr: addr.to_string(),
            password: password.to_string(),
            reply_timeout,
            conn: Mutex::new(conn),
        })
    }

    async fn open(
        addr: &str,
        password: &str,
        reply_timeout: Duration,
    ) -> Result<Connection, RconError> {
        let stream = TcpStream::connect(addr).await?;
        let mut conn = Connection { stream, next_id: 1 };
        Self::authenticate(&mut conn, password, reply_timeout).await?;
        Ok(conn)
    }

    async fn authenticate(
        conn: &mut Connection,
        password: &str,
        reply_timeout: Duration,
    ) -> Result<(), RconError> {
        let id = conn.take_id();
        conn.stream
            .write_all(&encode_packet(id, SERVERDATA_AUTH, password))
            .await?;

        let mut packet = read_packet(&mut conn.stream, reply_timeout).await?;
        // Some servers send an empty response value before the auth verdict;
        // a non-empty one is a rejection notice ("you have been banned").
        if packet.kind == SERVERDATA_RESPONSE_VALUE {
            if !packet.body.is_empty() {
                return Err(RconError::AuthRejected(packet.body));
            }
            packet = read_packet(&mut conn.stream, reply_timeout).await?;
        }

        if packet.id == -1 {
            return Err(RconError::BadPassword);
        }
        if packet.kind != SERVERDATA_AUTH_RESPONSE || packet.id != id {
            return Err(RconError::AuthRejected(packet.body));
        }
        debug!("rcon handshake authenticated");
        Ok(())
    }

    async fn try_exec(
        conn: &mut Connection,
        command: &str,
        reply_timeout: Duration,
    ) -> Result<String, RconError> {
        let id = conn.take_id();
        conn.stream
            .write_all(&encode_packet(id, SERVERDATA_EXECCOMMAND, command))
            .await?;
        let packet = read_packet(&mut conn.stream, reply_timeout).await?;
        Ok(packet.body)
    }

    /// Sends one command and returns its reply.
    ///
    /// On a transport failure the connection is rebuilt and re-authenticated
    /// once; a second failure (or any credential failure) surfaces to the
    /// caller.
    pub async fn exec(&self, command: &str) -> Result<String, RconError> {
        let mut conn = self.conn.lock().await;

        let reply = match Self::try_exec(&mut conn, command, self.reply_timeout).await {
            Ok(reply) => reply,
            Err(RconError::BadPassword) => return Err(RconError::BadPassword),
            Err(e) => {
                warn!(
                    "rcon {}: exec failed ({}), reconnecting once",
                    self.addr, e
                );
                *conn = Self::open(&self.addr, &self.password, self.reply_timeout).await?;
                Self::try_exec(&mut conn, command, self.reply_timeout).await?
            }
        };

        Self::interpret(reply)
    }

    // Some engines accept the auth handshake but flag a stale password on the
    // first real command instead. Recognize that as a credential failure
    // rather than handing the text to the caller.
    fn interpret(reply: String) -> Result<String, RconError> {
        if reply.trim_end().ends_with(": Bad Password") {
            return Err(RconError::BadPassword);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn packet_encoding_layout() {
        let frame = encode_packet(7, SERVERDATA_AUTH, "pw");
        assert_eq!(&frame[0..4], &12i32.to_le_bytes());
        assert_eq!(&frame[4..8], &7i32.to_le_bytes());
        assert_eq!(&frame[8..12], &SERVERDATA_AUTH.to_le_bytes());
        assert_eq!(&frame[12..14], b"pw");
        assert_eq!(&frame[14..], &[0, 0]);
    }

    async fn expect_packet(stream: &mut TcpStream) -> Packet {
        read_packet(stream, Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test]
    async fn bad_password_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = expect_packet(&mut stream).await;
            assert_eq!(auth.kind, SERVERDATA_AUTH);
            let verdict = encode_packet(-1, SERVERDATA_AUTH_RESPONSE, "");
            stream.write_all(&verdict).await.unwrap();
        });

        let result =
            HandshakeTransport::connect(&addr, "wrong", Duration::from_millis(500)).await;
        assert!(matches!(result, Err(RconError::BadPassword)));
    }

    #[tokio::test]
    async fn exec_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = expect_packet(&mut stream).await;
            let ok = encode_packet(auth.id, SERVERDATA_AUTH_RESPONSE, "");
            stream.write_all(&ok).await.unwrap();

            let cmd = expect_packet(&mut stream).await;
            assert_eq!(cmd.kind, SERVERDATA_EXECCOMMAND);
            assert_eq!(cmd.body, "status");
            let reply = encode_packet(cmd.id, SERVERDATA_RESPONSE_VALUE, "2 players");
            stream.write_all(&reply).await.unwrap();
        });

        let transport = HandshakeTransport::connect(&addr, "pw", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(transport.exec("status").await.unwrap(), "2 players");
    }

    #[tokio::test]
    async fn exec_reconnects_and_reauthenticates_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            // First connection: authenticate, then drop before serving.
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = expect_packet(&mut stream).await;
            let ok = encode_packet(auth.id, SERVERDATA_AUTH_RESPONSE, "");
            stream.write_all(&ok).await.unwrap();
            drop(stream);

            // Second connection serves the command.
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = expect_packet(&mut stream).await;
            let ok = encode_packet(auth.id, SERVERDATA_AUTH_RESPONSE, "");
            stream.write_all(&ok).await.unwrap();
            let cmd = expect_packet(&mut stream).await;
            let reply = encode_packet(cmd.id, SERVERDATA_RESPONSE_VALUE, "back online");
            stream.write_all(&reply).await.unwrap();
        });

        let transport = HandshakeTransport::connect(&addr, "pw", Duration::from_millis(500))
            .await
            .unwrap();
        // Give the server task time to drop the first connection.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.exec("status").await.unwrap(), "back online");
    }

    #[tokio::test]
    async fn stale_password_on_exec_is_recognized() {
        assert!(matches!(
            HandshakeTransport::interpret("admin: Bad Password".to_string()),
            Err(RconError::BadPassword)
        ));
        assert_eq!(
            HandshakeTransport::interpret("all good".to_string()).unwrap(),
            "all good"
        );
    }
}

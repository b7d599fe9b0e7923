//! Datagram RCON transport with retry, timeout and queueing policy.
//!
//! One socket is shared by every caller. Synchronous request/response
//! exchanges take an async mutex for the whole exchange so the wire bytes of
//! two commands never interleave; the fire-and-forget queue worker takes the
//! same mutex for each command it drains.

use crate::codec;
use crate::error::RconError;
use async_trait::async_trait;
use log::{debug, error, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout, Instant};

/// Pause between retry attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Hard deadline for a whole retry loop, regardless of the retry budget.
const SEND_DEADLINE: Duration = Duration::from_secs(5);

/// How long to wait for follow-up datagrams of a multi-packet reply.
const CONTINUATION_WINDOW: Duration = Duration::from_millis(25);

/// Default per-attempt reply timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(800);

/// Default retry budget for synchronous commands.
pub const DEFAULT_RETRIES: u32 = 2;

// Commands that change server state irreversibly. Re-sending one after a
// failed attempt risks double-execution once the peer has already acted.
static NO_RETRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:quit|shutdown|map(?:_rotate)?)\b").unwrap());

/// Whether a command may be re-sent after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    NonRetryable,
}

impl Classification {
    pub fn of(command: &str) -> Self {
        if NO_RETRY.is_match(command.trim()) {
            Classification::NonRetryable
        } else {
            Classification::Retryable
        }
    }
}

/// A queued command, optionally carrying a reply notifier for callers that
/// want the response opportunistically without blocking on it.
#[derive(Debug)]
pub struct RconCommand {
    pub text: String,
    pub classification: Classification,
    reply: Option<oneshot::Sender<Option<String>>>,
}

impl RconCommand {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let classification = Classification::of(&text);
        Self {
            text,
            classification,
            reply: None,
        }
    }

    /// Like [`RconCommand::new`], but the queue worker will forward whatever
    /// reply the single attempt produced.
    pub fn with_reply(text: impl Into<String>) -> (Self, oneshot::Receiver<Option<String>>) {
        let (tx, rx) = oneshot::channel();
        let mut command = Self::new(text);
        command.reply = Some(tx);
        (command, rx)
    }
}

/// The shared socket and everything needed to run one exchange on it.
struct Wire {
    socket: UdpSocket,
    password: String,
    peer: String,
    lock: Mutex<()>,
}

impl Wire {
    /// One framed request followed by one framed reply within `reply_timeout`.
    async fn exchange(&self, frame: &[u8], reply_timeout: Duration) -> Option<String> {
        if let Err(e) = self.socket.send(frame).await {
            warn!("rcon {}: error sending: {}", self.peer, e);
            return None;
        }

        let mut buf = vec![0u8; 8192];
        let mut payload = match timeout(reply_timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(len)) => codec::strip_reply(&buf[..len]),
            Ok(Err(e)) => {
                warn!("rcon {}: error reading: {}", self.peer, e);
                return None;
            }
            Err(_) => {
                debug!("rcon {}: no reply within {:?}", self.peer, reply_timeout);
                return None;
            }
        };

        // Long replies arrive as several datagrams, each with its own prefix.
        while let Ok(Ok(len)) = timeout(CONTINUATION_WINDOW, self.socket.recv(&mut buf)).await {
            payload.push_str(&codec::strip_reply(&buf[..len]));
        }

        Some(payload)
    }

    /// Retry loop around [`Wire::exchange`]. `max_retries` bounds the total
    /// number of attempts; non-retryable commands get exactly one.
    async fn send_framed(
        &self,
        command: &str,
        frame: &[u8],
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Option<String> {
        let classification = Classification::of(command);
        let deadline = Instant::now() + SEND_DEADLINE;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(reply) = self.exchange(frame, reply_timeout).await {
                debug!("rcon {}: received {} bytes", self.peer, reply.len());
                return Some(reply);
            }

            if classification == Classification::NonRetryable {
                debug!("rcon {}: no retry for {:?}", self.peer, command);
                return None;
            }
            if attempts >= max_retries.max(1) {
                error!("rcon {}: too many tries, aborting {:?}", self.peer, command);
                return None;
            }
            if Instant::now() + RETRY_BACKOFF >= deadline {
                error!("rcon {}: send deadline reached for {:?}", self.peer, command);
                return None;
            }

            sleep(RETRY_BACKOFF).await;
            debug!(
                "rcon {}: retry sending {:?} ({}/{})",
                self.peer, command, attempts, max_retries
            );
        }
    }
}

/// Retrying request/response transport over a single datagram socket, plus a
/// fire-and-forget queue drained by a background worker one command at a
/// time, FIFO.
pub struct RconTransport {
    wire: Arc<Wire>,
    queue: mpsc::UnboundedSender<RconCommand>,
    stop: Arc<AtomicBool>,
}

impl RconTransport {
    /// Connects the shared socket to the game server and starts the queue
    /// worker.
    pub async fn connect(addr: &str, password: &str) -> Result<Self, RconError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        let wire = Arc::new(Wire {
            socket,
            password: password.to_string(),
            peer: addr.to_string(),
            lock: Mutex::new(()),
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        tokio::spawn(Self::drain_queue(Arc::clone(&wire), queue_rx, Arc::clone(&stop)));

        Ok(Self {
            wire,
            queue: queue_tx,
            stop,
        })
    }

    /// Sends one command and waits for its reply.
    ///
    /// Retries per attempt timeout up to `max_retries` total attempts, then
    /// gives up with `None`. Commands classified non-retryable abort after a
    /// single failed attempt.
    pub async fn send(
        &self,
        command: &str,
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Option<String> {
        let command = command.trim();
        let frame = codec::frame_rcon(&self.wire.password, command);
        let _guard = self.wire.lock.lock().await;
        self.wire
            .send_framed(command, &frame, max_retries, reply_timeout)
            .await
    }

    /// Password-less server query using the bare-command dialect.
    pub async fn query(
        &self,
        command: &str,
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Option<String> {
        let command = command.trim();
        let frame = codec::frame_query(command);
        let _guard = self.wire.lock.lock().await;
        self.wire
            .send_framed(command, &frame, max_retries, reply_timeout)
            .await
    }

    /// Appends commands to the fire-and-forget queue.
    ///
    /// Delivery order matches enqueue order; each command gets a single send
    /// attempt and its reply is discarded unless the command carries a reply
    /// notifier.
    pub fn enqueue<I>(&self, commands: I)
    where
        I: IntoIterator<Item = RconCommand>,
    {
        for command in commands {
            if self.queue.send(command).is_err() {
                warn!("rcon queue worker is gone, dropping command");
                return;
            }
        }
    }

    /// Signals the queue worker to stop at its next queue pop.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wake the worker if the queue is idle.
        let _ = self.queue.send(RconCommand::new(""));
    }

    async fn drain_queue(
        wire: Arc<Wire>,
        mut queue: mpsc::UnboundedReceiver<RconCommand>,
        stop: Arc<AtomicBool>,
    ) {
        while let Some(command) = queue.recv().await {
            if stop.load(Ordering::Relaxed) {
                debug!("rcon queue worker stopping");
                break;
            }
            let text = command.text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            let frame = codec::frame_rcon(&wire.password, &text);
            let reply = {
                let _guard = wire.lock.lock().await;
                wire.send_framed(&text, &frame, 1, DEFAULT_TIMEOUT).await
            };
            if let Some(notify) = command.reply {
                let _ = notify.send(reply);
            }
        }
    }
}

/// Seam between command issuers and the concrete transport, so the status
/// cache and reconciliation logic can be exercised against scripted peers.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn command(
        &self,
        command: &str,
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Option<String>;
}

#[async_trait]
impl CommandTransport for RconTransport {
    async fn command(
        &self,
        command: &str,
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Option<String> {
        self.send(command, max_retries, reply_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn state_changing_commands_are_non_retryable() {
        assert_eq!(Classification::of("quit"), Classification::NonRetryable);
        assert_eq!(Classification::of("shutdown"), Classification::NonRetryable);
        assert_eq!(
            Classification::of("map mp_toujane"),
            Classification::NonRetryable
        );
        assert_eq!(
            Classification::of("map_rotate"),
            Classification::NonRetryable
        );
        assert_eq!(Classification::of("  quit"), Classification::NonRetryable);
    }

    #[test]
    fn ordinary_commands_are_retryable() {
        assert_eq!(Classification::of("status"), Classification::Retryable);
        assert_eq!(Classification::of("say hello"), Classification::Retryable);
        // "mapname" is a cvar query, not a map change
        assert_eq!(Classification::of("mapname"), Classification::Retryable);
    }

    #[test]
    fn command_classification_is_attached() {
        assert_eq!(
            RconCommand::new("quit").classification,
            Classification::NonRetryable
        );
        assert_eq!(
            RconCommand::new("say hi").classification,
            Classification::Retryable
        );
    }

    /// Scripted peer: ignores the first `drop_first` requests, then answers
    /// every request with the canned payload. Counts attempts on the wire.
    async fn fake_server(
        drop_first: u32,
        payload: &'static str,
    ) -> (String, Arc<AtomicU32>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((_, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= drop_first {
                    continue;
                }
                let mut reply = codec::REPLY_PREFIX.to_vec();
                reply.extend_from_slice(payload.as_bytes());
                let _ = socket.send_to(&reply, peer).await;
            }
        });

        (addr, attempts)
    }

    #[tokio::test]
    async fn send_retries_until_success() {
        let (addr, attempts) = fake_server(2, "ok\n").await;
        let transport = RconTransport::connect(&addr, "pw").await.unwrap();

        let reply = transport
            .send("status", 3, Duration::from_millis(60))
            .await;
        assert_eq!(reply.as_deref(), Some("ok\n"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn send_gives_up_after_retry_budget() {
        let (addr, attempts) = fake_server(u32::MAX, "never\n").await;
        let transport = RconTransport::connect(&addr, "pw").await.unwrap();

        let reply = transport.send("status", 3, Duration::from_millis(40)).await;
        assert_eq!(reply, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_commands_get_one_attempt() {
        let (addr, attempts) = fake_server(u32::MAX, "never\n").await;
        let transport = RconTransport::connect(&addr, "pw").await.unwrap();

        let reply = transport.send("quit", 5, Duration::from_millis(40)).await;
        assert_eq!(reply, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_preserves_fifo_order_and_ignores_replies() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let text = String::from_utf8_lossy(&buf[4..len]).into_owned();
                let _ = seen_tx.send(text);
                let mut reply = codec::REPLY_PREFIX.to_vec();
                reply.extend_from_slice(b"ok\n");
                let _ = socket.send_to(&reply, peer).await;
            }
        });

        let transport = RconTransport::connect(&addr, "pw").await.unwrap();
        transport.enqueue([
            RconCommand::new("say one"),
            RconCommand::new("say two"),
            RconCommand::new("say three"),
        ]);

        let first = seen_rx.recv().await.unwrap();
        let second = seen_rx.recv().await.unwrap();
        let third = seen_rx.recv().await.unwrap();
        assert_eq!(first, "rcon \"pw\" say one\n");
        assert_eq!(second, "rcon \"pw\" say two\n");
        assert_eq!(third, "rcon \"pw\" say three\n");
    }

    #[tokio::test]
    async fn queued_command_can_report_its_reply() {
        let (addr, _) = fake_server(0, "pong\n").await;
        let transport = RconTransport::connect(&addr, "pw").await.unwrap();

        let (command, reply) = RconCommand::with_reply("ping");
        transport.enqueue([command]);
        assert_eq!(reply.await.unwrap().as_deref(), Some("pong\n"));
    }
}

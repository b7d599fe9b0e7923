//! Time-boxed memoization for the bulk player-status command.

use crate::transport::CommandTransport;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Ceiling for the configured TTL, bounding staleness under concurrent admin
/// commands.
pub const MAX_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct CacheState {
    text: Option<String>,
    expires_at: Option<Instant>,
}

/// Caches the response of one status command for a short TTL.
///
/// A read inside the TTL window returns the cached text without touching the
/// wire. A read after expiry performs one transport round trip; on success the
/// text and a fresh expiry are stored, on failure the text is cleared but the
/// expiry is left untouched so the next read retries immediately instead of
/// serving stale data.
///
/// Concurrent readers of the same miss may each issue a transport call; that
/// duplication is accepted rather than holding the cache lock across a wire
/// round trip.
pub struct StatusCache<T: CommandTransport + ?Sized> {
    transport: Arc<T>,
    command: String,
    ttl: Duration,
    max_retries: u32,
    reply_timeout: Duration,
    state: Mutex<CacheState>,
}

impl<T: CommandTransport + ?Sized> StatusCache<T> {
    pub fn new(
        transport: Arc<T>,
        command: impl Into<String>,
        ttl: Duration,
        max_retries: u32,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            command: command.into(),
            ttl: ttl.min(MAX_TTL),
            max_retries,
            reply_timeout,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the cached status text, fetching a fresh copy if the cache has
    /// expired. `None` means the transport came up empty; the caller sees the
    /// same degraded view an admin would.
    pub async fn get(&self) -> Option<String> {
        {
            let state = self.state.lock().await;
            if let (Some(text), Some(expires_at)) = (&state.text, state.expires_at) {
                if Instant::now() < expires_at {
                    debug!("status cache: serving cached {:?}", self.command);
                    return Some(text.clone());
                }
            }
        }

        let fresh = self
            .transport
            .command(&self.command, self.max_retries, self.reply_timeout)
            .await;

        let mut state = self.state.lock().await;
        match fresh {
            Some(text) if !text.is_empty() => {
                debug!("status cache: refreshed {:?}", self.command);
                state.text = Some(text.clone());
                state.expires_at = Some(Instant::now() + self.ttl);
                Some(text)
            }
            _ => {
                // Leave the expiry untouched so the next read goes straight
                // back to the wire.
                state.text = None;
                None
            }
        }
    }
}

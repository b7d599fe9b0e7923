//! Pending-authentication queue.
//!
//! The log announces a join before the authoritative player list necessarily
//! reflects it, so a freshly announced slot goes through a bounded series of
//! delayed retries against the status list before it becomes a registered
//! client. Entry lifecycle: announced → retrying → authenticated, abandoned
//! (retry budget spent) or cancelled (slot disconnected mid-flight).
//!
//! Retries run as independent timer tasks, but every touch of shared state
//! happens under the single roster lock, so a promotion can never interleave
//! with a log-driven mutation.

use crate::client::{Client, ClientState, Slot};
use crate::events::GameEvent;
use crate::registry::{ClientRegistry, MatchMode};
use crate::status::{parse_status, StatusPlayer};
use log::{debug, warn};
use rcon::{CommandTransport, StatusCache};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Knobs of the authentication process.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Attempts before a join is abandoned.
    pub max_retries: u32,
    /// Delay between the join line and the first status query.
    pub initial_delay: Duration,
    /// Delay between subsequent attempts.
    pub retry_delay: Duration,
    /// Identities shorter than this are treated as "no identity yet".
    pub guid_min_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_secs(2),
            retry_delay: Duration::from_secs(4),
            guid_min_len: 8,
        }
    }
}

/// A slot that announced a join but is not yet matched against the
/// authoritative list. References its slot only; never owns a client.
#[derive(Debug, Clone)]
pub struct PendingAuthEntry {
    pub slot: Slot,
    /// Identity candidate from the join line, if it passed the sanity check.
    pub guid: Option<String>,
    pub name: String,
    pub retries: u32,
    pub cancelled: bool,
}

/// Registry plus pending table behind one lock: promoting an entry to a
/// client is atomic with respect to every other roster mutation.
#[derive(Debug)]
pub struct Roster {
    pub clients: ClientRegistry,
    pub pending: HashMap<Slot, PendingAuthEntry>,
}

impl Roster {
    pub fn new(mode: MatchMode) -> Self {
        let mut clients = ClientRegistry::new(mode);
        clients.insert(Client::world());
        Self {
            clients,
            pending: HashMap::new(),
        }
    }
}

/// Drives the bounded-retry reconciliation of announced joins.
#[derive(Clone)]
pub struct PendingAuthQueue {
    roster: Arc<Mutex<Roster>>,
    status: Arc<StatusCache<dyn CommandTransport>>,
    events: mpsc::UnboundedSender<GameEvent>,
    config: AuthConfig,
}

impl PendingAuthQueue {
    pub fn new(
        roster: Arc<Mutex<Roster>>,
        status: Arc<StatusCache<dyn CommandTransport>>,
        events: mpsc::UnboundedSender<GameEvent>,
        config: AuthConfig,
    ) -> Self {
        Self {
            roster,
            status,
            events,
            config,
        }
    }

    /// Records a join announcement and schedules the first retry.
    ///
    /// An identity failing the minimum-length sanity check is cleared rather
    /// than rejecting the join: the authoritative list may still provide one.
    pub async fn announce(&self, slot: Slot, guid: Option<String>, name: String) {
        let guid = guid.filter(|g| {
            let ok = g.len() >= self.config.guid_min_len;
            if !ok {
                debug!(
                    "slot {}: identity {:?} below minimum length {}, clearing",
                    slot, g, self.config.guid_min_len
                );
            }
            ok
        });

        {
            let mut roster = self.roster.lock().await;
            if roster.clients.get(slot).is_some() {
                debug!("slot {} already registered: ignoring announce", slot);
                return;
            }
            if roster.pending.contains_key(&slot) {
                debug!("slot {} already in the authentication queue: aborting join", slot);
                return;
            }
            roster.pending.insert(
                slot,
                PendingAuthEntry {
                    slot,
                    guid,
                    name: name.clone(),
                    retries: 0,
                    cancelled: false,
                },
            );
        }

        debug!("{:?} connected on slot {}: waiting for authentication", name, slot);
        self.schedule(slot, self.config.initial_delay);
    }

    /// Flags a pending entry for cancellation. Cooperative: the flag is
    /// observed when the next scheduled retry fires.
    pub async fn cancel(&self, slot: Slot) -> bool {
        let mut roster = self.roster.lock().await;
        self.cancel_locked(&mut roster, slot)
    }

    pub fn cancel_locked(&self, roster: &mut Roster, slot: Slot) -> bool {
        match roster.pending.get_mut(&slot) {
            Some(entry) => {
                entry.cancelled = true;
                debug!("slot {} disconnected mid-authentication: flagged for removal", slot);
                true
            }
            None => false,
        }
    }

    fn schedule(&self, slot: Slot, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.retry(slot).await;
        });
    }

    /// One scheduled authentication attempt for a slot.
    pub async fn retry(&self, slot: Slot) {
        // Check the cancellation flag before paying for a status fetch.
        {
            let mut roster = self.roster.lock().await;
            match roster.pending.get(&slot) {
                None => {
                    debug!("slot {}: retry no longer needed", slot);
                    return;
                }
                Some(entry) if entry.cancelled => {
                    roster.pending.remove(&slot);
                    return;
                }
                Some(_) => {}
            }
        }

        let players = match self.status.get().await {
            Some(text) => parse_status(&text),
            None => Vec::new(),
        };

        let mut roster = self.roster.lock().await;
        // A disconnect may have landed while the fetch was in flight.
        let Some(entry) = roster.pending.get(&slot).cloned() else {
            return;
        };
        if entry.cancelled {
            roster.pending.remove(&slot);
            return;
        }

        let authoritative = players.iter().find(|p| p.slot == slot);
        let identity = authoritative.and_then(|p| self.identity_for(&roster.clients, &entry, p));

        match (authoritative, identity) {
            (Some(player), Some(identity)) => {
                roster.pending.remove(&slot);
                let mut client = Client::new(slot, identity, entry.name);
                client.ip = Some(player.ip.clone());
                client.state = ClientState::Alive;
                if roster.clients.insert(client.clone()) {
                    debug!("slot {} authenticated as {:?}", slot, client.name);
                    let _ = self.events.send(GameEvent::AuthenticatedJoin { client });
                }
            }
            (present, _) => {
                let Some(entry) = roster.pending.get_mut(&slot) else {
                    return;
                };
                entry.retries += 1;
                if entry.retries >= self.config.max_retries {
                    warn!(
                        "could not authenticate {:?} on slot {}: giving up after {} attempts",
                        entry.name, slot, entry.retries
                    );
                    roster.pending.remove(&slot);
                    return;
                }
                if present.is_some() {
                    debug!("slot {}: no usable identity yet, retry #{}", slot, entry.retries);
                } else {
                    debug!("slot {}: not in the player list yet, retry #{}", slot, entry.retries);
                }
                drop(roster);
                self.schedule(slot, self.config.retry_delay);
            }
        }
    }

    // The identity a promoted client will carry, or None when another retry
    // is needed. Address mode always has one once the slot shows up; guid
    // mode prefers the join-line candidate and falls back to a well-formed
    // status guid.
    fn identity_for(
        &self,
        clients: &ClientRegistry,
        entry: &PendingAuthEntry,
        player: &StatusPlayer,
    ) -> Option<String> {
        match clients.mode() {
            MatchMode::Address => Some(player.ip.clone()),
            MatchMode::Guid => entry.guid.clone().or_else(|| {
                (player.guid.len() >= self.config.guid_min_len).then(|| player.guid.clone())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedStatus(Option<String>);

    #[async_trait]
    impl CommandTransport for FixedStatus {
        async fn command(&self, _: &str, _: u32, _: Duration) -> Option<String> {
            self.0.clone()
        }
    }

    const STATUS_WITH_SLOT_3: &str = "\
map: mp_toujane
num score ping guid     name            lastmsg address               qport rate
--- ----- ---- -------- --------------- ------- --------------------- ----- -----
  3     0   29 ab12cd34 Phantom              50 68.63.6.62:28960       6597  5000
";

    fn fast_config() -> AuthConfig {
        AuthConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            retry_delay: Duration::from_millis(5),
            guid_min_len: 8,
        }
    }

    fn queue_with_status(
        mode: MatchMode,
        status: Option<&str>,
    ) -> (
        PendingAuthQueue,
        Arc<Mutex<Roster>>,
        mpsc::UnboundedReceiver<GameEvent>,
    ) {
        let roster = Arc::new(Mutex::new(Roster::new(mode)));
        let transport: Arc<dyn CommandTransport> =
            Arc::new(FixedStatus(status.map(str::to_string)));
        let cache = Arc::new(StatusCache::new(
            transport,
            "status",
            Duration::from_millis(1),
            1,
            Duration::from_millis(50),
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = PendingAuthQueue::new(Arc::clone(&roster), cache, events_tx, fast_config());
        (queue, roster, events_rx)
    }

    #[tokio::test]
    async fn resolvable_join_is_authenticated_on_first_retry() {
        let (queue, roster, mut events) =
            queue_with_status(MatchMode::Guid, Some(STATUS_WITH_SLOT_3));

        queue
            .announce(3, Some("ab12cd34".to_string()), "Phantom".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roster = roster.lock().await;
        let client = roster.clients.get(3).expect("client registered");
        assert_eq!(client.guid, "ab12cd34");
        assert_eq!(client.state, ClientState::Alive);
        assert_eq!(client.ip.as_deref(), Some("68.63.6.62"));
        assert!(roster.pending.is_empty());

        match events.try_recv().expect("one event emitted") {
            GameEvent::AuthenticatedJoin { client } => assert_eq!(client.slot, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn absent_slot_is_abandoned_after_retry_budget() {
        let (queue, roster, mut events) = queue_with_status(MatchMode::Guid, Some("map: x\n"));

        queue
            .announce(7, Some("ab12cd34".to_string()), "Ghost".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let roster = roster.lock().await;
        assert!(roster.clients.get(7).is_none());
        assert!(roster.pending.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_failure_counts_as_a_missed_attempt() {
        let (queue, roster, _events) = queue_with_status(MatchMode::Guid, None);

        queue
            .announce(7, Some("ab12cd34".to_string()), "Ghost".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let roster = roster.lock().await;
        assert!(roster.clients.get(7).is_none());
        assert!(roster.pending.is_empty());
    }

    #[tokio::test]
    async fn present_slot_without_usable_identity_is_abandoned() {
        // Slot 3 shows up in the list but its guid fails the sanity check,
        // and the join line carried none either.
        const STATUS_SHORT_GUID: &str = "\
map: mp_toujane
num score ping guid     name            lastmsg address               qport rate
--- ----- ---- -------- --------------- ------- --------------------- ----- -----
  3     0   29 ab Phantom              50 68.63.6.62:28960       6597  5000
";
        let (queue, roster, mut events) =
            queue_with_status(MatchMode::Guid, Some(STATUS_SHORT_GUID));

        queue.announce(3, None, "Phantom".to_string()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let roster = roster.lock().await;
        assert!(roster.clients.get(3).is_none());
        assert!(roster.pending.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_resolvable_slot() {
        let (queue, roster, mut events) =
            queue_with_status(MatchMode::Guid, Some(STATUS_WITH_SLOT_3));

        queue
            .announce(3, Some("ab12cd34".to_string()), "Phantom".to_string())
            .await;
        // Disconnect before the first scheduled retry fires.
        assert!(queue.cancel(3).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roster = roster.lock().await;
        assert!(roster.clients.get(3).is_none());
        assert!(roster.pending.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn short_candidate_identity_is_cleared_and_filled_from_the_list() {
        let (queue, roster, _events) =
            queue_with_status(MatchMode::Guid, Some(STATUS_WITH_SLOT_3));

        // "ab" fails the sanity check; the status list guid takes over.
        queue
            .announce(3, Some("ab".to_string()), "Phantom".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roster = roster.lock().await;
        assert_eq!(roster.clients.get(3).unwrap().guid, "ab12cd34");
    }

    #[tokio::test]
    async fn address_mode_authenticates_without_any_guid() {
        let (queue, roster, _events) =
            queue_with_status(MatchMode::Address, Some(STATUS_WITH_SLOT_3));

        queue.announce(3, None, "Phantom".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roster = roster.lock().await;
        assert_eq!(roster.clients.get(3).unwrap().guid, "68.63.6.62");
    }

    #[tokio::test]
    async fn duplicate_announce_is_ignored() {
        let (queue, roster, _events) = queue_with_status(MatchMode::Guid, Some("map: x\n"));

        queue
            .announce(5, Some("ab12cd34".to_string()), "First".to_string())
            .await;
        queue
            .announce(5, Some("ffffffff".to_string()), "Second".to_string())
            .await;

        let roster = roster.lock().await;
        assert_eq!(roster.pending.len(), 1);
        assert_eq!(roster.pending[&5].name, "First");
    }
}

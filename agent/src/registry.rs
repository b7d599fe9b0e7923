//! Authoritative in-memory set of known clients, keyed by slot.

use crate::client::{Client, ClientState, Slot};
use crate::status::StatusPlayer;
use log::{debug, info, warn};
use std::collections::HashMap;

/// How identities are compared during authentication and reconciliation.
///
/// Some minimal-auth deployments never populate a guid; those run in
/// [`MatchMode::Address`], where the network address substitutes for the
/// identity everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Guid,
    Address,
}

/// Slot-keyed client registry. At most one client exists per slot; a slot is
/// reused only after an explicit [`ClientRegistry::remove`].
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<Slot, Client>,
    mode: MatchMode,
}

impl ClientRegistry {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            clients: HashMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn get(&self, slot: Slot) -> Option<&Client> {
        self.clients.get(&slot)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Client> {
        self.clients.get_mut(&slot)
    }

    pub fn get_by_guid(&self, guid: &str) -> Option<&Client> {
        self.clients.values().find(|c| c.guid == guid)
    }

    pub fn get_by_addr(&self, ip: &str) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| c.ip.as_deref() == Some(ip))
    }

    /// Registers a client. Refuses to overwrite an occupied slot, which would
    /// break the one-client-per-slot invariant.
    pub fn insert(&mut self, client: Client) -> bool {
        if self.clients.contains_key(&client.slot) {
            warn!(
                "refusing to register client {:?} on occupied slot {}",
                client.name, client.slot
            );
            return false;
        }
        if !client.is_world() {
            info!("client {:?} registered on slot {}", client.name, client.slot);
        }
        self.clients.insert(client.slot, client);
        true
    }

    /// Removes a client, freeing its slot for reuse. The returned client is
    /// marked disconnected.
    pub fn remove(&mut self, slot: Slot) -> Option<Client> {
        let mut client = self.clients.remove(&slot)?;
        client.state = ClientState::Disconnected;
        info!("client {:?} removed from slot {}", client.name, slot);
        Some(client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Reconciles the registry against the authoritative player list.
    ///
    /// For every registered client the slot's authoritative entry must still
    /// carry the same identity (guid, or address in address mode). A mismatch
    /// means the slot was reused by a different connection; keeping the old
    /// client would attribute subsequent events to the wrong person, so it is
    /// removed. Clients absent from the list are removed too. Returns the
    /// removed clients so disconnect events can be emitted.
    pub fn sync(&mut self, players: &[StatusPlayer]) -> Vec<Client> {
        debug!("synchronising {} registered clients", self.clients.len());
        let mut stale: Vec<Slot> = Vec::new();

        for client in self.clients.values() {
            if client.is_world() {
                continue;
            }
            let authoritative = players.iter().find(|p| p.slot == client.slot);
            let in_sync = match (authoritative, self.mode) {
                (Some(p), MatchMode::Guid) => p.guid == client.guid,
                (Some(p), MatchMode::Address) => Some(p.ip.as_str()) == client.ip.as_deref(),
                (None, _) => false,
            };
            if in_sync {
                debug!("slot {} in sync", client.slot);
            } else {
                debug!("slot {} out of sync, dropping {:?}", client.slot, client.name);
                stale.push(client.slot);
            }
        }

        stale.into_iter().filter_map(|s| self.remove(s)).collect()
    }
}

//! Client model: slots, identities, teams and lifecycle state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server-assigned slot number. Transient: slots are reused after a
/// disconnect, so nothing durable may be keyed on one.
pub type Slot = i32;

/// Slot of the non-player "world" actor (falls, triggers, environment).
pub const WORLD_SLOT: Slot = -1;

/// Identity of the world actor.
pub const WORLD_GUID: &str = "WORLD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Unknown,
    Free,
    Red,
    Blue,
    Spectator,
}

impl Team {
    /// Maps the game's team tokens onto the generic team model.
    pub fn from_token(token: &str) -> Team {
        match token.to_ascii_lowercase().as_str() {
            "axis" | "red" => Team::Red,
            "allies" | "blue" => Team::Blue,
            "free" => Team::Free,
            "spectator" | "spec" => Team::Spectator,
            _ => Team::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Connecting,
    Authenticating,
    Alive,
    Dead,
    Disconnected,
}

/// A connected client as reconstructed from the game log and the
/// authoritative status list.
///
/// Owned exclusively by the registry; events and the pending-auth queue refer
/// back to a client by slot only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub slot: Slot,
    /// Persistent identity. In address-only deployments this carries the
    /// network address instead.
    pub guid: String,
    pub name: String,
    /// Network address as reported by the status list, when known.
    pub ip: Option<String>,
    pub team: Team,
    pub state: ClientState,
    /// Opaque per-client metadata bag for the plugin layer.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl Client {
    pub fn new(slot: Slot, guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slot,
            guid: guid.into(),
            name: name.into(),
            ip: None,
            team: Team::Unknown,
            state: ClientState::Connecting,
            extra: HashMap::new(),
        }
    }

    /// The hidden world actor, registered at startup so environment kills
    /// resolve to a client like any other.
    pub fn world() -> Self {
        let mut client = Client::new(WORLD_SLOT, WORLD_GUID, "World");
        client.state = ClientState::Alive;
        client
    }

    pub fn is_world(&self) -> bool {
        self.slot == WORLD_SLOT || self.guid == WORLD_GUID
    }
}

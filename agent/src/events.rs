//! Typed domain events handed to the plugin layer.
//!
//! Events carry snapshots of the clients involved at the moment the event was
//! classified; the registry stays the only owner of live client state.

use crate::client::Client;
use serde::Serialize;
use std::collections::HashMap;

/// Contextual fields of a combat record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombatData {
    pub weapon: String,
    pub damage: f32,
    pub location: String,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A known client re-announced itself (map change, team switch).
    Join { client: Client },
    /// A pending authentication completed and the client is now registered.
    AuthenticatedJoin { client: Client },
    Disconnect { client: Client },

    Kill {
        attacker: Client,
        victim: Client,
        data: CombatData,
    },
    TeamKill {
        attacker: Client,
        victim: Client,
        data: CombatData,
    },
    Suicide {
        client: Client,
        data: CombatData,
    },
    Damage {
        attacker: Client,
        victim: Client,
        data: CombatData,
    },
    TeamDamage {
        attacker: Client,
        victim: Client,
        data: CombatData,
    },
    SelfDamage {
        client: Client,
        data: CombatData,
    },

    Say { client: Client, text: String },
    TeamSay { client: Client, text: String },
    PrivateSay {
        client: Client,
        target: Option<Client>,
        text: String,
    },
    ClientAction { client: Client, action: String },
    ItemPickup { client: Client, item: String },

    RoundStart { settings: HashMap<String, String> },
    MapExit { data: String },

    /// Recognized low-value action with no dedicated handler.
    Passthrough { action: String, data: String },
    /// Unrecognized action, kept for observability.
    Unknown { action: String, data: String },
}

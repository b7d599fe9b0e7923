//! Bridges parsed log records to roster mutations and typed events.
//!
//! One handler call owns the roster lock for the duration of its mutations,
//! takes snapshots of the clients involved, then emits events after the lock
//! is released. Handlers never block on the wire while holding the lock.

use crate::auth::{PendingAuthQueue, Roster};
use crate::classify::{classify_damage, classify_kill, parse_damage, DamageKind, KillKind};
use crate::client::{Client, ClientState, Slot, Team, WORLD_SLOT};
use crate::dispatch::{self, Action, LogRecord, Route};
use crate::events::{CombatData, GameEvent};
use crate::registry::{ClientRegistry, MatchMode};
use crate::status::parse_status;
use log::{debug, warn};
use rcon::{CommandTransport, StatusCache};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Delay between a round-end line and the reconciliation pass, long enough
/// for the post-map slot churn to settle.
const EXIT_SYNC_DELAY: Duration = Duration::from_secs(10);

// Some engines prefix chat payloads with a control character.
const CHAT_CONTROL_PREFIX: char = '\u{15}';

#[derive(Clone, Copy)]
enum Chat {
    All,
    Team,
}

/// Routes structured log records to their handlers.
#[derive(Clone)]
pub struct EventHandlers {
    roster: Arc<Mutex<Roster>>,
    auth: PendingAuthQueue,
    status: Arc<StatusCache<dyn CommandTransport>>,
    events: mpsc::UnboundedSender<GameEvent>,
}

impl EventHandlers {
    pub fn new(
        roster: Arc<Mutex<Roster>>,
        auth: PendingAuthQueue,
        status: Arc<StatusCache<dyn CommandTransport>>,
        events: mpsc::UnboundedSender<GameEvent>,
    ) -> Self {
        Self {
            roster,
            auth,
            status,
            events,
        }
    }

    /// Parses and handles one raw log line.
    pub async fn dispatch_line(&self, line: &str) {
        if let Some(record) = dispatch::parse(line) {
            self.handle(&record).await;
        }
    }

    pub async fn handle(&self, rec: &LogRecord) {
        match dispatch::route(&rec.action) {
            Route::Handled(Action::Kill) => self.on_combat(rec, true).await,
            Route::Handled(Action::Damage) => self.on_combat(rec, false).await,
            Route::Handled(Action::Join) => self.on_join(rec).await,
            Route::Handled(Action::Quit) => self.on_quit(rec).await,
            Route::Handled(Action::ClientAction) => self.on_action(rec).await,
            Route::Handled(Action::Say) => self.on_chat(rec, Chat::All).await,
            Route::Handled(Action::SayTeam) => self.on_chat(rec, Chat::Team).await,
            Route::Handled(Action::Tell) => self.on_tell(rec).await,
            Route::Handled(Action::InitGame) => self.on_initgame(rec),
            Route::Handled(Action::ExitLevel) => self.on_exitlevel(rec),
            Route::Handled(Action::Item) => self.on_item(rec).await,
            Route::Passthrough => {
                let _ = self.events.send(GameEvent::Passthrough {
                    action: rec.action.clone(),
                    data: rec.data().to_string(),
                });
            }
            Route::Unknown => {
                debug!("no handler for action {:?}: {:?}", rec.action, rec.raw);
                let _ = self.events.send(GameEvent::Unknown {
                    action: rec.action.clone(),
                    data: rec.data().to_string(),
                });
            }
        }
    }

    async fn on_combat(&self, rec: &LogRecord, lethal: bool) {
        let (Some(victim_slot), Some(attacker_slot)) = (rec.slot("cid"), rec.slot("acid")) else {
            debug!("combat line without slots: {:?}", rec.raw);
            return;
        };

        let weapon = rec.field("aweap").unwrap_or("none").to_string();
        let data = CombatData {
            weapon: weapon.clone(),
            damage: parse_damage(rec.field("damage")),
            location: rec.field("dlocation").unwrap_or("none").to_string(),
            cause: rec.field("dtype").unwrap_or("").to_string(),
        };

        let mut roster = self.roster.lock().await;

        // The victim resolves first so an unregistered victim still gets its
        // join queued even when the attacker is unknown too.
        let Some(mut victim) = refresh(
            &mut roster.clients,
            victim_slot,
            rec.field("name"),
            rec.field("team"),
        ) else {
            drop(roster);
            // A combat line proves the slot is live; queue it for
            // authentication and drop this record.
            debug!("combat line for unregistered slot {}: queueing join", victim_slot);
            self.auth
                .announce(
                    victim_slot,
                    rec.field("guid").map(str::to_string),
                    rec.field("name").unwrap_or("unknown").to_string(),
                )
                .await;
            return;
        };

        let attacker = if attacker_slot == WORLD_SLOT {
            roster.clients.get(WORLD_SLOT).cloned()
        } else {
            refresh(
                &mut roster.clients,
                attacker_slot,
                rec.field("aname"),
                rec.field("ateam"),
            )
        };
        let Some(attacker) = attacker else {
            debug!("combat line from unregistered slot {}", attacker_slot);
            return;
        };

        if lethal {
            victim.state = ClientState::Dead;
            if let Some(live) = roster.clients.get_mut(victim_slot) {
                live.state = ClientState::Dead;
            }
        }
        drop(roster);

        let event = if lethal {
            match classify_kill(&attacker, &victim, &weapon) {
                KillKind::Suicide => GameEvent::Suicide {
                    client: victim,
                    data,
                },
                KillKind::TeamKill => GameEvent::TeamKill {
                    attacker,
                    victim,
                    data,
                },
                KillKind::Kill => GameEvent::Kill {
                    attacker,
                    victim,
                    data,
                },
            }
        } else {
            match classify_damage(&attacker, &victim, &weapon) {
                DamageKind::SelfDamage => GameEvent::SelfDamage {
                    client: victim,
                    data,
                },
                DamageKind::TeamDamage => GameEvent::TeamDamage {
                    attacker,
                    victim,
                    data,
                },
                DamageKind::Damage => GameEvent::Damage {
                    attacker,
                    victim,
                    data,
                },
            }
        };
        let _ = self.events.send(event);
    }

    async fn on_join(&self, rec: &LogRecord) {
        let Some(slot) = rec.slot("cid") else {
            return;
        };
        let guid = rec.field("guid").map(str::to_string);
        let name = rec.field("name").unwrap_or("unknown").to_string();

        let mut roster = self.roster.lock().await;
        let mode = roster.clients.mode();
        if let Some(existing) = roster.clients.get_mut(slot) {
            let same_identity = match (mode, &guid) {
                (MatchMode::Guid, Some(g)) => existing.guid.eq_ignore_ascii_case(g),
                (MatchMode::Guid, None) => false,
                (MatchMode::Address, _) => existing.name == name,
            };
            if same_identity {
                // Re-announce after a map change or team switch.
                existing.name = name;
                if let Some(team) = rec.field("team") {
                    existing.team = Team::from_token(team);
                }
                existing.state = ClientState::Alive;
                let snapshot = existing.clone();
                drop(roster);
                let _ = self.events.send(GameEvent::Join { client: snapshot });
                return;
            }
            // The slot was reused by a different connection.
            if let Some(old) = roster.clients.remove(slot) {
                let _ = self.events.send(GameEvent::Disconnect { client: old });
            }
        }
        drop(roster);
        self.auth.announce(slot, guid, name).await;
    }

    async fn on_quit(&self, rec: &LogRecord) {
        let Some(slot) = rec.slot("cid") else {
            return;
        };
        let mut roster = self.roster.lock().await;
        if let Some(client) = roster.clients.remove(slot) {
            let _ = self.events.send(GameEvent::Disconnect { client });
        } else if !self.auth.cancel_locked(&mut roster, slot) {
            debug!("quit for unknown slot {}", slot);
        }
    }

    async fn on_action(&self, rec: &LogRecord) {
        let Some(client) = self.snapshot(rec).await else {
            return;
        };
        let action = rec.field("type").unwrap_or("unknown").to_string();
        let _ = self.events.send(GameEvent::ClientAction { client, action });
    }

    async fn on_chat(&self, rec: &LogRecord, kind: Chat) {
        let Some(client) = self.snapshot(rec).await else {
            return;
        };
        let text = chat_text(rec);
        let event = match kind {
            Chat::All => GameEvent::Say { client, text },
            Chat::Team => GameEvent::TeamSay { client, text },
        };
        let _ = self.events.send(event);
    }

    async fn on_tell(&self, rec: &LogRecord) {
        let Some(sender_slot) = rec.slot("cid") else {
            return;
        };
        let roster = self.roster.lock().await;
        let Some(client) = roster.clients.get(sender_slot).cloned() else {
            debug!("chat from unregistered slot {}", sender_slot);
            return;
        };
        let target = rec
            .slot("acid")
            .and_then(|slot| roster.clients.get(slot).cloned());
        drop(roster);

        let _ = self.events.send(GameEvent::PrivateSay {
            client,
            target,
            text: chat_text(rec),
        });
    }

    fn on_initgame(&self, rec: &LogRecord) {
        let settings = parse_settings(rec.data());
        let _ = self.events.send(GameEvent::RoundStart { settings });
    }

    fn on_exitlevel(&self, rec: &LogRecord) {
        let _ = self.events.send(GameEvent::MapExit {
            data: rec.data().to_string(),
        });
        // Slots churn heavily around a map change; reconcile once it settles.
        self.schedule_sync(EXIT_SYNC_DELAY);
    }

    async fn on_item(&self, rec: &LogRecord) {
        let mut parts = rec.data().splitn(2, char::is_whitespace);
        let Some(slot) = parts.next().and_then(|s| s.parse::<Slot>().ok()) else {
            debug!("item line without a slot: {:?}", rec.raw);
            return;
        };
        let item = parts.next().unwrap_or("").trim().to_string();

        let roster = self.roster.lock().await;
        let Some(client) = roster.clients.get(slot).cloned() else {
            debug!("item pickup for unregistered slot {}", slot);
            return;
        };
        drop(roster);

        let _ = self.events.send(GameEvent::ItemPickup { client, item });
    }

    // Snapshot of the acting client, with name refreshed from the line.
    async fn snapshot(&self, rec: &LogRecord) -> Option<Client> {
        let slot = rec.slot("cid")?;
        let mut roster = self.roster.lock().await;
        let client = refresh(&mut roster.clients, slot, rec.field("name"), None);
        if client.is_none() {
            debug!("line for unregistered slot {}: {:?}", slot, rec.raw);
        }
        client
    }

    /// Reconciles the registry against a fresh authoritative player list and
    /// emits a disconnect for every client that turned out to be stale.
    pub async fn sync_clients(&self) {
        let players = match self.status.get().await {
            Some(text) => parse_status(&text),
            None => {
                warn!("client sync skipped: no status available");
                return;
            }
        };
        let removed = {
            let mut roster = self.roster.lock().await;
            roster.clients.sync(&players)
        };
        for client in removed {
            let _ = self.events.send(GameEvent::Disconnect { client });
        }
    }

    pub fn schedule_sync(&self, delay: Duration) {
        let handlers = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handlers.sync_clients().await;
        });
    }
}

fn refresh(
    clients: &mut ClientRegistry,
    slot: Slot,
    name: Option<&str>,
    team: Option<&str>,
) -> Option<Client> {
    let client = clients.get_mut(slot)?;
    if let Some(name) = name {
        if !name.is_empty() && client.name != name {
            client.name = name.to_string();
        }
    }
    if let Some(team) = team {
        if !team.is_empty() {
            client.team = Team::from_token(team);
        }
    }
    Some(client.clone())
}

fn chat_text(rec: &LogRecord) -> String {
    rec.field("text")
        .unwrap_or("")
        .trim_start_matches(CHAT_CONTROL_PREFIX)
        .trim()
        .to_string()
}

// `\key\value\key\value` blobs from round-start lines.
fn parse_settings(data: &str) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    let mut parts = data.trim_start_matches('\\').split('\\');
    while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
        settings.insert(key.to_string(), value.to_string());
    }
    settings
}

//! Semantic classification of combat records.

use crate::client::{Client, Team};

/// Damage carried by a full-kill record that cannot report the true amount.
/// Using full health keeps downstream damage aggregation meaningful.
pub const FULL_HEALTH: f32 = 100.0;

// Scripted self-destruct devices take the whole area with them; counting
// those as team kills punishes the victimized team twice.
pub const TEAMKILL_EXEMPT_WEAPONS: &[&str] = &["MOD_KAMIKAZE", "briefcase_bomb_mp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillKind {
    Kill,
    TeamKill,
    Suicide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageKind {
    Damage,
    TeamDamage,
    SelfDamage,
}

fn is_self_inflicted(attacker: &Client, victim: &Client) -> bool {
    attacker.slot == victim.slot || attacker.is_world()
}

fn is_friendly_fire(attacker: &Client, victim: &Client, weapon: &str) -> bool {
    attacker.team != Team::Unknown
        && attacker.team != Team::Free
        && attacker.team == victim.team
        && !TEAMKILL_EXEMPT_WEAPONS.contains(&weapon)
}

/// Labels a lethal record.
pub fn classify_kill(attacker: &Client, victim: &Client, weapon: &str) -> KillKind {
    if is_self_inflicted(attacker, victim) {
        KillKind::Suicide
    } else if is_friendly_fire(attacker, victim, weapon) {
        KillKind::TeamKill
    } else {
        KillKind::Kill
    }
}

/// Labels a partial-damage record, with self/team sub-variants by the same
/// rule as kills.
pub fn classify_damage(attacker: &Client, victim: &Client, weapon: &str) -> DamageKind {
    if is_self_inflicted(attacker, victim) {
        DamageKind::SelfDamage
    } else if is_friendly_fire(attacker, victim, weapon) {
        DamageKind::TeamDamage
    } else {
        DamageKind::Damage
    }
}

/// Parses the damage field of a combat record, falling back to the
/// full-health sentinel when the record carries none.
pub fn parse_damage(field: Option<&str>) -> f32 {
    field
        .and_then(|d| d.parse::<f32>().ok())
        .unwrap_or(FULL_HEALTH)
}

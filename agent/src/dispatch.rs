//! Log-line parsing and action routing.
//!
//! Each raw line is matched against an ordered list of line-shape matchers,
//! most specific first; the first structural match wins and its named capture
//! groups become the record's field map. The action token then selects a
//! handler from a table built once at startup. Lines nothing matches are
//! dropped at a low log level; a bad line never aborts dispatch.

use crate::client::Slot;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

// Elapsed-time token some engines put in front of every line.
static TIME_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[0-9:.]+\s?)?").unwrap());

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{2,}$").unwrap());

static LINE_FORMATS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // kills/damage by the world actor
        r"(?i)^(?P<action>[A-Z]);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9-]{1,2});(?P<team>[a-z]+);(?P<name>[^;]+);(?P<aguid>[^;]*);(?P<acid>-1);(?P<ateam>world);(?P<aname>[^;]*);(?P<aweap>[a-z0-9_-]+);(?P<damage>[0-9.]+);(?P<dtype>[A-Z_]+);(?P<dlocation>[a-z_]+))$",
        // player kills/damage
        r"(?i)^(?P<action>[A-Z]);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<team>[a-z]*);(?P<name>[^;]+);(?P<aguid>[^;]+);(?P<acid>[0-9]{1,2});(?P<ateam>[a-z]*);(?P<aname>[^;]+);(?P<aweap>[a-z0-9_-]+);(?P<damage>[0-9.]+);(?P<dtype>[A-Z_]+);(?P<dlocation>[a-z_]+))$",
        // suicides
        r"(?i)^(?P<action>[A-Z]);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<team>[a-z]*);(?P<name>[^;]+);(?P<aguid>[^;]*);(?P<acid>-1);(?P<ateam>[a-z]*);(?P<aname>[^;]+);(?P<aweap>[a-z0-9_-]+);(?P<damage>[0-9.]+);(?P<dtype>[A-Z_]+);(?P<dlocation>[a-z_]+))$",
        // team actions
        r"(?i)^(?P<action>[A-Z]);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<team>[a-z]+);(?P<name>[^;]+);(?P<type>[a-z_]+))$",
        // tell-like events
        r"(?i)^(?P<action>[a-z]+);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<name>[^;]+);(?P<aguid>[^;]+);(?P<acid>[0-9]{1,2});(?P<aname>[^;]+);(?P<text>.*))$",
        // say-like events
        r"(?i)^(?P<action>[a-z]+);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<name>[^;]+);(?P<text>.*))$",
        // all other structured events
        r"(?i)^(?P<action>[A-Z]);(?P<data>(?P<guid>[^;]+);(?P<cid>[0-9]{1,2});(?P<name>[^;]+))$",
        // loose `action: data` server lines
        r"(?i)^(?P<action>[a-z_]\w*):\s*(?P<data>.*)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// One structurally parsed log line. Ephemeral: consumed synchronously by a
/// single handler.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub action: String,
    pub fields: HashMap<String, String>,
    pub raw: String,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.field(name)?.parse().ok()
    }

    pub fn data(&self) -> &str {
        self.field("data").unwrap_or("")
    }
}

/// Parses one raw log line into a structured record.
///
/// Returns `None` for separators, empty lines, and lines no matcher accepts
/// (the latter are reported at debug level).
pub fn parse(line: &str) -> Option<LogRecord> {
    let line = line.trim();
    let line = TIME_PREFIX.replace(line, "");
    let line = line.trim();
    if line.is_empty() || SEPARATOR.is_match(line) {
        return None;
    }

    for matcher in LINE_FORMATS.iter() {
        let Some(caps) = matcher.captures(line) else {
            continue;
        };
        let mut fields = HashMap::new();
        for name in matcher.capture_names().flatten() {
            if name == "action" {
                continue;
            }
            if let Some(value) = caps.name(name) {
                fields.insert(name.to_string(), value.as_str().to_string());
            }
        }
        return Some(LogRecord {
            action: caps["action"].to_string(),
            fields,
            raw: line.to_string(),
        });
    }

    debug!("unhandled log line: {:?}", line);
    None
}

/// Actions with a dedicated handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Kill,
    Damage,
    Join,
    Quit,
    ClientAction,
    Say,
    SayTeam,
    Tell,
    InitGame,
    ExitLevel,
    Item,
}

static ACTION_TABLE: Lazy<HashMap<&'static str, Action>> = Lazy::new(|| {
    HashMap::from([
        ("K", Action::Kill),
        ("D", Action::Damage),
        ("J", Action::Join),
        ("Q", Action::Quit),
        ("A", Action::ClientAction),
        ("say", Action::Say),
        ("sayteam", Action::SayTeam),
        ("tell", Action::Tell),
        ("InitGame", Action::InitGame),
        ("ExitLevel", Action::ExitLevel),
        ("Item", Action::Item),
    ])
});

// Recognized but low-value actions: forwarded as generic passthrough events.
static PASSTHROUGH_ACTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "W",
        "L",
        "JT",
        "AD",
        "Weapon",
        "Exit",
        "ShutdownGame",
        "warmup",
        "restartgame",
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Handled(Action),
    Passthrough,
    Unknown,
}

/// Selects the handler for an action token.
pub fn route(action: &str) -> Route {
    if let Some(action) = ACTION_TABLE.get(action) {
        Route::Handled(*action)
    } else if PASSTHROUGH_ACTIONS.contains(action) {
        Route::Passthrough
    } else {
        Route::Unknown
    }
}

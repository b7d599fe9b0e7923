//! Parsing of the bulk player-status text returned by the game server.
//!
//! The block is a map header, a column-header line, a dash separator and one
//! line per connected entity. Names may contain internal whitespace, so the
//! matcher anchors on the fixed-format fields at both ends of the line and
//! takes the middle lazily as the name.

use crate::client::Slot;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// num score ping guid     name            lastmsg address               qport rate
// --- ----- ---- -------- --------------- ------- --------------------- ----- -----
//   3     3   37 ab12cd34 xlr8or              0   145.99.135.227:27960   3598 25000
static PLAYER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^\s*
        (?P<slot>[0-9]+)\s+
        (?P<score>-?[0-9]+)\s+
        (?P<ping>[0-9]+)\s+
        (?P<guid>[0-9a-z]+)\s+
        (?P<name>.*?)\s+
        (?P<last>[0-9]+)\s+
        (?P<ip>(?:[0-9]{1,3}\.){3}[0-9]{1,3}|bot):?
        (?P<port>-?[0-9]{1,5})?\s+
        (?P<qport>-?[0-9]{1,5})\s+
        (?P<rate>[0-9]+)\s*$",
    )
    .unwrap()
});

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-[\s-]*$").unwrap());

/// One entity line from the status block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPlayer {
    pub slot: Slot,
    pub score: i32,
    pub ping: u32,
    pub guid: String,
    pub name: String,
    pub ip: String,
}

/// Parses every well-formed player line out of a status block. Malformed
/// lines are skipped with a low-severity log entry; they never abort the
/// rest of the block.
pub fn parse_status(text: &str) -> Vec<StatusPlayer> {
    let mut players = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || SEPARATOR.is_match(line) {
            continue;
        }

        let Some(caps) = PLAYER_LINE.captures(line) else {
            // Header lines fall through here too; only real oddities matter.
            if !line.starts_with("map:") && !line.trim_start().starts_with("num ") {
                debug!("skipping unparseable status line: {:?}", line);
            }
            continue;
        };

        // The numeric fields always parse when the line matched.
        let (Ok(slot), Ok(score), Ok(ping)) = (
            caps["slot"].parse::<Slot>(),
            caps["score"].parse::<i32>(),
            caps["ping"].parse::<u32>(),
        ) else {
            debug!("skipping status line with out-of-range fields: {:?}", line);
            continue;
        };

        players.push(StatusPlayer {
            slot,
            score,
            ping,
            guid: caps["guid"].to_string(),
            name: caps["name"].to_string(),
            ip: caps["ip"].to_string(),
        });
    }
    players
}

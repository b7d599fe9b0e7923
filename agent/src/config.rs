//! Runtime configuration of the agent.

use crate::auth::AuthConfig;
use crate::registry::MatchMode;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Per-attempt reply timeout for remote console commands.
    pub command_timeout: Duration,
    /// Total attempt budget for retryable commands.
    pub max_retries: u32,
    /// TTL of the shared status cache.
    pub status_ttl: Duration,
    pub auth: AuthConfig,
    pub match_mode: MatchMode,
    /// Game log file to follow.
    pub log_path: PathBuf,
    /// Interval of the periodic registry reconciliation.
    pub sync_interval: Duration,
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 28960,
            password: String::new(),
            command_timeout: Duration::from_millis(500),
            max_retries: 3,
            status_ttl: Duration::from_secs(2),
            auth: AuthConfig::default(),
            match_mode: MatchMode::default(),
            log_path: PathBuf::from("games_mp.log"),
            sync_interval: Duration::from_secs(60),
        }
    }
}

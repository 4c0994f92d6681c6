//! Administrative commands built on top of a session
//!
//! Status queries (`list_players`, `ping`, `max_players`, `server_info`)
//! never return errors: a failed command degrades to a safe default so a
//! poller can still report the server as reachable. Actions (`broadcast`,
//! `save_world`) do report failure.

use crate::error::RconError;
use crate::session::RconSession;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Enumerates connected players
pub const LIST_PLAYERS_COMMAND: &str = "ListPlayers";
/// Cheap diagnostic used for latency measurement and the player cap
pub const DIAGNOSTIC_COMMAND: &str = "GetGameLog";
pub const SAVE_WORLD_COMMAND: &str = "SaveWorld";
pub const BROADCAST_COMMAND: &str = "Broadcast";
/// Line the server prints instead of a listing when nobody is online
pub const NO_PLAYERS_SENTINEL: &str = "No Players Connected";
pub const DEFAULT_MAX_PLAYERS: u32 = 150;

static PLAYER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+\.\s*([^,]+),\s*([a-f0-9]+)\s*$").unwrap());

static MAX_PLAYERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)MaxPlayers[:\s]+(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    /// Platform account id, printed by the server as hex
    pub identity: String,
}

/// Outcome of asking a server who is online
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerListing {
    /// At least one line parsed as a player
    Players(Vec<PlayerRecord>),
    /// Blank output or the "no players" sentinel
    Empty,
    /// Output was present but no line looked like a player
    Unparsed { raw: String },
    /// The command itself failed
    Unavailable { reason: String },
}

impl PlayerListing {
    pub fn count(&self) -> u32 {
        self.players().len() as u32
    }

    pub fn players(&self) -> &[PlayerRecord] {
        match self {
            Self::Players(players) => players,
            _ => &[],
        }
    }

    pub fn into_players(self) -> Vec<PlayerRecord> {
        match self {
            Self::Players(players) => players,
            _ => Vec::new(),
        }
    }

    /// False when the count is a fallback rather than an observation
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Players(_) | Self::Empty)
    }
}

/// Raw diagnostic output captured at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub response: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Parses `ListPlayers` output of the form `<index>. <name>, <hex-id>`.
///
/// Blank lines and the sentinel are ignored; other lines that don't match
/// are skipped without failing the whole listing.
pub fn parse_player_list(text: &str) -> PlayerListing {
    let mut players = Vec::new();
    let mut unmatched = 0usize;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.contains(NO_PLAYERS_SENTINEL) {
            continue;
        }

        match PLAYER_LINE.captures(line) {
            Some(caps) => players.push(PlayerRecord {
                name: caps[1].trim().to_string(),
                identity: caps[2].trim().to_string(),
            }),
            None => unmatched += 1,
        }
    }

    if !players.is_empty() {
        PlayerListing::Players(players)
    } else if unmatched > 0 {
        PlayerListing::Unparsed {
            raw: text.to_string(),
        }
    } else {
        PlayerListing::Empty
    }
}

/// Extracts the number following a `MaxPlayers` marker, if any
pub fn parse_max_players(text: &str) -> Option<u32> {
    MAX_PLAYERS
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

impl RconSession {
    pub async fn list_players(&mut self) -> PlayerListing {
        match self.execute_command(LIST_PLAYERS_COMMAND).await {
            Ok(text) => parse_player_list(&text),
            Err(e) => {
                debug!("Player listing failed on {}: {}", self.address(), e);
                PlayerListing::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Round trip of one diagnostic command in milliseconds, 0 on failure.
    ///
    /// This is application-level latency, not ICMP.
    pub async fn ping(&mut self) -> u64 {
        let started = Instant::now();
        match self.execute_command(DIAGNOSTIC_COMMAND).await {
            Ok(_) => started.elapsed().as_millis() as u64,
            Err(e) => {
                debug!("Ping failed on {}: {}", self.address(), e);
                0
            }
        }
    }

    pub async fn max_players(&mut self) -> u32 {
        match self.execute_command(DIAGNOSTIC_COMMAND).await {
            Ok(text) => parse_max_players(&text).unwrap_or(DEFAULT_MAX_PLAYERS),
            Err(e) => {
                debug!("Max players lookup failed on {}: {}", self.address(), e);
                DEFAULT_MAX_PLAYERS
            }
        }
    }

    pub async fn server_info(&mut self) -> ServerInfo {
        let result = self.execute_command(DIAGNOSTIC_COMMAND).await;
        let timestamp = Utc::now();
        match result {
            Ok(response) => ServerInfo {
                response,
                error: None,
                timestamp,
            },
            Err(e) => ServerInfo {
                response: String::new(),
                error: Some(e.to_string()),
                timestamp,
            },
        }
    }

    /// Sends a chat broadcast to everyone on the server
    pub async fn broadcast(&mut self, message: &str) -> Result<String, RconError> {
        self.execute_command(&format!("{} {}", BROADCAST_COMMAND, message))
            .await
    }

    pub async fn save_world(&mut self) -> Result<String, RconError> {
        self.execute_command(SAVE_WORLD_COMMAND).await
    }
}

//! Snapshot types produced by a poll cycle

use crate::poller::ServerObservation;
use chrono::{DateTime, Utc};
use rcon::{PlayerRecord, RconConfig, DEFAULT_MAX_PLAYERS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One game server as described by the registry.
///
/// The RCON port and password are required; registry entries without them
/// never become descriptors.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Unique, stable identifier
    pub key: String,
    pub name: String,
    pub host: String,
    pub game_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    /// Map the server is expected to run
    pub map_name: String,
}

impl ServerDescriptor {
    pub fn rcon_config(&self, connect_timeout: Duration, io_timeout: Duration) -> RconConfig {
        RconConfig::new(self.host.clone(), self.rcon_port, self.rcon_password.clone())
            .with_connect_timeout(connect_timeout)
            .with_io_timeout(io_timeout)
    }
}

impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("game_port", &self.game_port)
            .field("query_port", &self.query_port)
            .field("rcon_port", &self.rcon_port)
            .field("rcon_password", &"<redacted>")
            .field("map_name", &self.map_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    Crashed,
    Restarting,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Crashed => "crashed",
            Self::Restarting => "restarting",
        };
        f.pad(label)
    }
}

/// What one server looked like at one point in time.
///
/// Built once per cycle and never updated; the next cycle replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatusSnapshot {
    pub server_key: String,
    pub name: String,
    pub status: ServerStatus,
    pub player_count: u32,
    pub players: Vec<PlayerRecord>,
    /// False when the player count is a fallback because the listing
    /// failed or could not be parsed
    pub players_parsed: bool,
    pub max_players: u32,
    pub ping_ms: u64,
    pub uptime_seconds: u64,
    pub map_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ServerStatusSnapshot {
    pub fn online(
        descriptor: &ServerDescriptor,
        observation: ServerObservation,
        uptime_seconds: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let players_parsed = observation.listing.is_observed();
        let players = observation.listing.into_players();

        Self {
            server_key: descriptor.key.clone(),
            name: descriptor.name.clone(),
            status: ServerStatus::Online,
            player_count: players.len() as u32,
            players,
            players_parsed,
            max_players: observation.max_players,
            ping_ms: observation.ping_ms,
            uptime_seconds,
            map_name: descriptor.map_name.clone(),
            timestamp,
            error_message: None,
        }
    }

    pub fn offline(
        descriptor: &ServerDescriptor,
        reason: impl fmt::Display,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            server_key: descriptor.key.clone(),
            name: descriptor.name.clone(),
            status: ServerStatus::Offline,
            player_count: 0,
            players: Vec::new(),
            players_parsed: false,
            max_players: DEFAULT_MAX_PLAYERS,
            ping_ms: 0,
            uptime_seconds: 0,
            map_name: descriptor.map_name.clone(),
            timestamp,
            error_message: Some(reason.to_string()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ServerStatus::Online
    }
}

/// Consolidated view of the whole fleet for one cycle.
///
/// Derived entirely from the per-server snapshots; the counters are a fold
/// over `servers` and do not depend on the order servers were polled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub servers: BTreeMap<String, ServerStatusSnapshot>,
    pub total_servers: usize,
    pub online_servers: usize,
    pub total_players: u32,
    pub generated_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    pub fn from_snapshots<I>(snapshots: I, generated_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = ServerStatusSnapshot>,
    {
        let servers: BTreeMap<String, ServerStatusSnapshot> = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.server_key.clone(), snapshot))
            .collect();

        let online: Vec<&ServerStatusSnapshot> =
            servers.values().filter(|s| s.is_online()).collect();

        Self {
            total_servers: servers.len(),
            online_servers: online.len(),
            total_players: online.iter().map(|s| s.player_count).sum(),
            servers,
            generated_at,
        }
    }

    /// Share of servers online, as a percentage. An empty fleet is 0%.
    pub fn availability_percent(&self) -> f64 {
        if self.total_servers == 0 {
            return 0.0;
        }
        self.online_servers as f64 / self.total_servers as f64 * 100.0
    }

    pub fn get(&self, server_key: &str) -> Option<&ServerStatusSnapshot> {
        self.servers.get(server_key)
    }

    /// Fleet-wide figures recorded once per cycle
    pub fn metrics(&self) -> ClusterMetrics {
        ClusterMetrics {
            cluster_uptime_percentage: self.availability_percent(),
            total_players: self.total_players,
            online_servers: self.online_servers,
            total_servers: self.total_servers,
            recorded_at: self.generated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub cluster_uptime_percentage: f64,
    pub total_players: u32,
    pub online_servers: usize,
    pub total_servers: usize,
    pub recorded_at: DateTime<Utc>,
}

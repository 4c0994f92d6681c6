//! Health alerts derived from a poll cycle
//!
//! Evaluation is a pure function of a snapshot, the thresholds and the
//! local hour; delivery is left to the caller.

use crate::model::{ClusterSnapshot, ServerStatusSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ServerOffline,
    HighPing,
    ServerFull,
    LowActivity,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ServerOffline => "Server Offline",
            Self::HighPing => "High Ping",
            Self::ServerFull => "Server Full",
            Self::LowActivity => "Low Activity",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub server_key: String,
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Ping strictly above this raises `HighPing`
    pub max_ping_ms: u64,
    /// Fewer players than this during peak hours raises `LowActivity`
    pub min_peak_players: u32,
    /// Local hours considered peak, inclusive
    pub peak_hours: RangeInclusive<u32>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_ping_ms: 500,
            min_peak_players: 5,
            peak_hours: 19..=23,
        }
    }
}

/// Alerts for one server. `local_hour` is the hour of day (0-23) the
/// peak-hours rule is checked against.
pub fn evaluate(snapshot: &ServerStatusSnapshot, thresholds: &AlertThresholds, local_hour: u32) -> Vec<Alert> {
    let alert = |kind: AlertKind, message: String| Alert {
        server_key: snapshot.server_key.clone(),
        kind,
        message,
        timestamp: snapshot.timestamp,
    };

    if !snapshot.is_online() {
        let reason = snapshot.error_message.as_deref().unwrap_or("no response");
        return vec![alert(
            AlertKind::ServerOffline,
            format!("Server {} is not responding: {}", snapshot.name, reason),
        )];
    }

    let mut alerts = Vec::new();

    if snapshot.ping_ms > thresholds.max_ping_ms {
        alerts.push(alert(
            AlertKind::HighPing,
            format!("Server {} has high ping: {}ms", snapshot.name, snapshot.ping_ms),
        ));
    }

    if snapshot.player_count >= snapshot.max_players {
        alerts.push(alert(
            AlertKind::ServerFull,
            format!("Server {} is at capacity: {} players", snapshot.name, snapshot.player_count),
        ));
    }

    // A fallback count of zero says nothing about activity
    if snapshot.players_parsed
        && thresholds.peak_hours.contains(&local_hour)
        && snapshot.player_count < thresholds.min_peak_players
    {
        alerts.push(alert(
            AlertKind::LowActivity,
            format!(
                "Server {} has low activity during peak hours: {} players",
                snapshot.name, snapshot.player_count
            ),
        ));
    }

    alerts
}

/// Alerts for every server in the cluster, in key order
pub fn evaluate_cluster(cluster: &ClusterSnapshot, thresholds: &AlertThresholds, local_hour: u32) -> Vec<Alert> {
    cluster
        .servers
        .values()
        .flat_map(|snapshot| evaluate(snapshot, thresholds, local_hour))
        .collect()
}

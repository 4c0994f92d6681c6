//! Fleet poller: fans out one RCON poll per server and folds the results
//!
//! Each server gets its own task, its own connection and its own deadline.
//! A server that refuses, rejects the password or stalls comes back as an
//! `Offline` snapshot carrying the reason; it never affects the others and
//! never fails the cycle.

use crate::model::{ClusterSnapshot, ServerDescriptor, ServerStatusSnapshot};
use crate::store::{StatusRow, StatusSink, UptimeStore};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rcon::{PlayerListing, RconError, RconSession};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task;
use tokio::time::timeout;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;
/// Round trips made by `observe_server`
const EXCHANGES_PER_POLL: u32 = 4;

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Rcon(#[from] RconError),
    #[error("poll timed out after {0:?}")]
    Timeout(Duration),
    #[error("poll task failed: {0}")]
    TaskFailed(String),
}

/// Timeouts and fan-out limits for one cycle
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Hard bound on one server's whole poll, after which it is abandoned
    pub deadline: Duration,
    /// Servers polled at the same time
    pub max_in_flight: usize,
}

impl PollOptions {
    /// Deadline covers the connect plus one I/O timeout for each exchange
    /// of a poll: auth, the player listing and two diagnostic commands
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
            deadline: connect_timeout + io_timeout * EXCHANGES_PER_POLL,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT)
    }
}

/// What a successful poll learned about a server
#[derive(Debug, Clone)]
pub struct ServerObservation {
    pub listing: PlayerListing,
    pub ping_ms: u64,
    pub max_players: u32,
}

/// Opens a session, runs the status queries and closes it again.
///
/// Only opening the session can fail; the queries themselves degrade to
/// defaults inside the session.
pub async fn observe_server(
    descriptor: &ServerDescriptor,
    options: &PollOptions,
) -> Result<ServerObservation, PollError> {
    let config = descriptor.rcon_config(options.connect_timeout, options.io_timeout);
    let mut session = RconSession::open(&config).await?;

    let listing = session.list_players().await;
    let ping_ms = session.ping().await;
    let max_players = session.max_players().await;

    session.close().await;

    Ok(ServerObservation {
        listing,
        ping_ms,
        max_players,
    })
}

pub struct FleetPoller {
    options: PollOptions,
    uptime: Arc<dyn UptimeStore>,
    sink: Arc<dyn StatusSink>,
}

impl FleetPoller {
    pub fn new(options: PollOptions, uptime: Arc<dyn UptimeStore>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            options,
            uptime,
            sink,
        }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    /// Polls every descriptor concurrently and returns the cluster view.
    ///
    /// Always returns a complete snapshot with one entry per server key,
    /// even when every server is down. Keys are expected to be unique; a
    /// repeated key is polled once, for its first descriptor.
    pub async fn poll(&self, descriptors: &[ServerDescriptor]) -> ClusterSnapshot {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight));

        let tasks: Vec<_> = unique_by_key(descriptors)
            .into_iter()
            .map(|descriptor| {
                let task_descriptor = descriptor.clone();
                let options = self.options.clone();
                let permits = Arc::clone(&permits);

                let handle = tokio::spawn(async move {
                    // The deadline starts once the task may actually run
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| PollError::TaskFailed(e.to_string()))?;

                    match timeout(options.deadline, observe_server(&task_descriptor, &options)).await {
                        Ok(result) => result,
                        // Dropping the poll future closes its connection
                        Err(_) => Err(PollError::Timeout(options.deadline)),
                    }
                });

                (descriptor, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (descriptor, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PollError::TaskFailed(e.to_string())),
            };
            outcomes.push((descriptor, result));
        }

        let now = Utc::now();
        let online_keys = outcomes
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(descriptor, _)| descriptor.key.clone())
            .collect();
        let uptimes = self.lookup_uptimes(online_keys, now).await;

        let snapshots: Vec<ServerStatusSnapshot> = outcomes
            .into_iter()
            .map(|(descriptor, result)| {
                let uptime_seconds = uptimes.get(&descriptor.key).copied().unwrap_or(0);
                snapshot_for(descriptor, result, uptime_seconds, now)
            })
            .collect();
        self.persist(&snapshots).await;

        let cluster = ClusterSnapshot::from_snapshots(snapshots, Utc::now());
        info!(
            "Poll cycle complete: {}/{} servers online, {} players ({:?})",
            cluster.online_servers,
            cluster.total_servers,
            cluster.total_players,
            started.elapsed()
        );
        cluster
    }

    /// Uptime for each online server, read off the runtime threads.
    /// Lookups that fail report 0.
    async fn lookup_uptimes(&self, keys: Vec<String>, now: DateTime<Utc>) -> HashMap<String, u64> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let store = Arc::clone(&self.uptime);
        let lookup = task::spawn_blocking(move || {
            keys.into_iter()
                .map(|key| {
                    let seconds = store.uptime_seconds(&key, now).unwrap_or_else(|e| {
                        error!("Uptime lookup failed for {}: {}", key, e);
                        0
                    });
                    (key, seconds)
                })
                .collect::<HashMap<_, _>>()
        });

        match lookup.await {
            Ok(uptimes) => uptimes,
            Err(e) => {
                error!("Uptime lookup task failed: {}", e);
                HashMap::new()
            }
        }
    }

    /// One batched sink write per cycle; failures are logged, never raised
    async fn persist(&self, snapshots: &[ServerStatusSnapshot]) {
        if snapshots.is_empty() {
            return;
        }

        let rows: Vec<StatusRow> = snapshots.iter().map(StatusRow::from).collect();
        let sink = Arc::clone(&self.sink);
        match task::spawn_blocking(move || sink.upsert_all(&rows)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to persist status rows: {}", e),
            Err(e) => error!("Persistence task failed: {}", e),
        }
    }
}

/// Drops descriptors whose key was already seen, keeping the first
fn unique_by_key(descriptors: &[ServerDescriptor]) -> Vec<&ServerDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .filter(|descriptor| {
            let first = seen.insert(descriptor.key.as_str());
            if !first {
                warn!("Duplicate server key {}, polling its first entry only", descriptor.key);
            }
            first
        })
        .collect()
}

/// Turns one poll result into a snapshot
fn snapshot_for(
    descriptor: &ServerDescriptor,
    result: Result<ServerObservation, PollError>,
    uptime_seconds: u64,
    now: DateTime<Utc>,
) -> ServerStatusSnapshot {
    match result {
        Ok(observation) => {
            if let PlayerListing::Unparsed { raw } = &observation.listing {
                warn!("Could not parse player list from {}: {:?}", descriptor.key, raw);
            }

            debug!(
                "{} online: {} players, {}ms",
                descriptor.key,
                observation.listing.count(),
                observation.ping_ms
            );
            ServerStatusSnapshot::online(descriptor, observation, uptime_seconds, now)
        }
        Err(e) => {
            warn!("Server {} offline: {}", descriptor.key, e);
            ServerStatusSnapshot::offline(descriptor, &e, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerStatus;
    use crate::store::{MemoryStatusSink, MemoryUptimeStore, StoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unreachable_descriptor(key: &str, port: u16) -> ServerDescriptor {
        ServerDescriptor {
            key: key.to_string(),
            name: key.to_uppercase(),
            host: "127.0.0.1".to_string(),
            game_port: 7777,
            query_port: 27015,
            rcon_port: port,
            rcon_password: "pw".to_string(),
            map_name: "TheIsland".to_string(),
        }
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    struct FailingSink;

    /// Counts how often the poller writes to it
    #[derive(Default)]
    struct CountingSink {
        inner: MemoryStatusSink,
        batches: AtomicUsize,
    }

    impl StatusSink for CountingSink {
        fn upsert(&self, row: &StatusRow) -> Result<(), StoreError> {
            self.inner.upsert(row)
        }

        fn upsert_all(&self, rows: &[StatusRow]) -> Result<(), StoreError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert_all(rows)
        }

        fn get(&self, server_key: &str) -> Result<Option<StatusRow>, StoreError> {
            self.inner.get(server_key)
        }

        fn rows(&self) -> Result<Vec<StatusRow>, StoreError> {
            self.inner.rows()
        }
    }

    impl StatusSink for FailingSink {
        fn upsert(&self, _row: &StatusRow) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }

        fn get(&self, _server_key: &str) -> Result<Option<StatusRow>, StoreError> {
            Ok(None)
        }

        fn rows(&self) -> Result<Vec<StatusRow>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_deadline_covers_all_exchanges() {
        let options = PollOptions::default();
        assert_eq!(options.deadline, Duration::from_secs(50));
        assert_eq!(options.with_max_in_flight(0).max_in_flight, 1);
    }

    #[tokio::test]
    async fn test_all_servers_down_still_yields_snapshot() {
        let port = closed_port().await;
        let sink = Arc::new(MemoryStatusSink::new());
        let uptime = Arc::new(MemoryUptimeStore::new());
        let poller = FleetPoller::new(
            PollOptions::new(Duration::from_secs(2), Duration::from_secs(2)),
            uptime.clone(),
            sink.clone(),
        );

        let descriptors = vec![unreachable_descriptor("a", port), unreachable_descriptor("b", port)];
        let cluster = poller.poll(&descriptors).await;

        assert_eq!(cluster.total_servers, 2);
        assert_eq!(cluster.online_servers, 0);
        assert_eq!(cluster.total_players, 0);
        for snapshot in cluster.servers.values() {
            assert_eq!(snapshot.status, ServerStatus::Offline);
            assert!(!snapshot.error_message.as_deref().unwrap_or("").is_empty());
        }

        // Offline servers are persisted but never start an uptime reference
        assert_eq!(sink.rows().unwrap().len(), 2);
        assert_eq!(uptime.get("a").unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let poller = FleetPoller::new(
            PollOptions::default(),
            Arc::new(MemoryUptimeStore::new()),
            Arc::new(MemoryStatusSink::new()),
        );
        let cluster = poller.poll(&[]).await;
        assert_eq!(cluster.total_servers, 0);
        assert!(cluster.servers.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let port = closed_port().await;
        let poller = FleetPoller::new(
            PollOptions::new(Duration::from_secs(2), Duration::from_secs(2)),
            Arc::new(MemoryUptimeStore::new()),
            Arc::new(FailingSink),
        );

        let cluster = poller.poll(&[unreachable_descriptor("a", port)]).await;
        assert_eq!(cluster.total_servers, 1);
    }

    #[tokio::test]
    async fn test_one_batched_write_per_cycle() {
        let port = closed_port().await;
        let sink = Arc::new(CountingSink::default());
        let poller = FleetPoller::new(
            PollOptions::new(Duration::from_secs(2), Duration::from_secs(2)),
            Arc::new(MemoryUptimeStore::new()),
            sink.clone(),
        );

        let descriptors = vec![
            unreachable_descriptor("a", port),
            unreachable_descriptor("b", port),
            unreachable_descriptor("c", port),
        ];
        poller.poll(&descriptors).await;
        poller.poll(&descriptors).await;

        assert_eq!(sink.batches.load(Ordering::SeqCst), 2);
        assert_eq!(sink.rows().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_polled_once() {
        let port = closed_port().await;
        let sink = Arc::new(MemoryStatusSink::new());
        let poller = FleetPoller::new(
            PollOptions::new(Duration::from_secs(2), Duration::from_secs(2)),
            Arc::new(MemoryUptimeStore::new()),
            sink.clone(),
        );

        let mut duplicate = unreachable_descriptor("a", port);
        duplicate.name = "Second A".to_string();
        let descriptors = vec![unreachable_descriptor("a", port), duplicate, unreachable_descriptor("b", port)];

        let cluster = poller.poll(&descriptors).await;
        assert_eq!(cluster.total_servers, 2);
        assert_eq!(cluster.get("a").unwrap().name, "A");
        assert_eq!(sink.rows().unwrap().len(), 2);
    }

    #[test]
    fn test_unique_by_key_keeps_first() {
        let descriptors = vec![
            unreachable_descriptor("a", 1),
            unreachable_descriptor("b", 2),
            unreachable_descriptor("a", 3),
        ];
        let ports: Vec<u16> = unique_by_key(&descriptors).iter().map(|d| d.rcon_port).collect();
        assert_eq!(ports, vec![1, 2]);
    }
}

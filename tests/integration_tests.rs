//! Integration tests for the RCON client and fleet poller
//!
//! These tests run real TCP connections against in-process mock servers.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use fleet::{
    load_descriptors, FileUptimeStore, FleetPoller, JsonFileStatusSink, MemoryStatusSink, MemoryUptimeStore,
    PollOptions, ServerStatus, StatusSink, UptimeStore,
};
use rcon::{PlayerListing, RconConfig, RconError, RconSession, SessionState};
use std::sync::Arc;
use std::time::Duration;
use support::{closed_port, descriptor, MockBehavior, MockRconServer, Mode, PASSWORD};
use tempfile::tempdir;
use tokio::time::{sleep, Instant};

const TWO_PLAYERS: &str = "1. Alice, a1b2c3\n2. Bob, d4e5f6\n";

fn fast_options() -> PollOptions {
    PollOptions::new(Duration::from_secs(2), Duration::from_secs(2))
}

fn memory_poller(options: PollOptions) -> (FleetPoller, Arc<MemoryStatusSink>, Arc<MemoryUptimeStore>) {
    let sink = Arc::new(MemoryStatusSink::new());
    let uptime = Arc::new(MemoryUptimeStore::new());
    let poller = FleetPoller::new(options, uptime.clone(), sink.clone());
    (poller, sink, uptime)
}

/// Waits for the server side to observe every client disconnect
async fn wait_for_release(server: &MockRconServer) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.open_connections() > 0 && Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.open_connections(), 0, "connection was not released");
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    /// Tests a full session lifecycle over TCP
    #[tokio::test]
    async fn session_over_tcp() {
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let config = RconConfig::new("127.0.0.1", server.port(), PASSWORD);

        let mut session = RconSession::open(&config).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let listing = session.list_players().await;
        let names: Vec<&str> = listing.players().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(session.max_players().await, 70);

        let reply = session.save_world().await.unwrap();
        assert!(reply.starts_with("Server received"));

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        wait_for_release(&server).await;
    }

    /// Tests that a wrong password is reported as an auth failure
    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let config = RconConfig::new("127.0.0.1", server.port(), "wrong");

        let err = RconSession::open(&config).await.unwrap_err();
        assert!(err.is_auth(), "unexpected error: {}", err);
        wait_for_release(&server).await;
    }

    /// Tests that a refused connection is a connect error
    #[tokio::test]
    async fn refused_connection() {
        let config = RconConfig::new("127.0.0.1", closed_port().await, PASSWORD);
        let err = RconSession::open(&config).await.unwrap_err();
        assert!(matches!(err, RconError::Connect { .. }));
    }

    /// Tests that a server which never answers the auth packet times out
    #[tokio::test]
    async fn stalled_auth_times_out() {
        let server = MockRconServer::start(MockBehavior::normal("").with_mode(Mode::Stall)).await;
        let config = RconConfig::new("127.0.0.1", server.port(), PASSWORD)
            .with_io_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = RconSession::open(&config).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "unexpected error: {}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
        wait_for_release(&server).await;
    }

    /// Tests an empty server
    #[tokio::test]
    async fn empty_server_listing() {
        let server = MockRconServer::start(MockBehavior::normal("No Players Connected")).await;
        let config = RconConfig::new("127.0.0.1", server.port(), PASSWORD);

        let mut session = RconSession::open(&config).await.unwrap();
        assert_eq!(session.list_players().await, PlayerListing::Empty);
        session.close().await;
    }
}

/// FLEET POLLING TESTS
mod fleet_tests {
    use super::*;

    /// Tests that one dead server does not affect the others
    #[tokio::test]
    async fn failure_isolation() {
        let one = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let three = MockRconServer::start(MockBehavior::normal("No Players Connected")).await;

        let descriptors = vec![
            one.descriptor("s1"),
            descriptor("s2", closed_port().await),
            three.descriptor("s3"),
        ];

        let (poller, _, _) = memory_poller(fast_options());
        let cluster = poller.poll(&descriptors).await;

        assert_eq!(cluster.total_servers, 3);
        assert_eq!(cluster.online_servers, 2);
        assert_eq!(cluster.total_players, 2);

        let s1 = cluster.get("s1").unwrap();
        assert_eq!(s1.status, ServerStatus::Online);
        assert_eq!(s1.player_count, 2);
        assert_eq!(s1.max_players, 70);
        assert!(s1.players_parsed);

        let s2 = cluster.get("s2").unwrap();
        assert_eq!(s2.status, ServerStatus::Offline);
        assert_eq!(s2.player_count, 0);
        assert!(!s2.error_message.as_deref().unwrap_or("").is_empty());

        assert_eq!(cluster.get("s3").unwrap().player_count, 0);

        wait_for_release(&one).await;
        wait_for_release(&three).await;
    }

    /// Tests that a rejected password marks only that server offline
    #[tokio::test]
    async fn auth_failure_is_offline() {
        let good = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let rejecting = MockRconServer::start(MockBehavior::normal("").with_mode(Mode::RejectAuth)).await;

        let (poller, _, uptime) = memory_poller(fast_options());
        let cluster = poller
            .poll(&[good.descriptor("good"), rejecting.descriptor("locked")])
            .await;

        let locked = cluster.get("locked").unwrap();
        assert_eq!(locked.status, ServerStatus::Offline);
        assert_eq!(locked.error_message.as_deref(), Some("authentication rejected"));
        assert!(cluster.get("good").unwrap().is_online());

        // Uptime references only start for servers seen online
        assert!(uptime.get("good").unwrap().is_some());
        assert!(uptime.get("locked").unwrap().is_none());
    }

    /// Tests that a slow but responsive server finishes all four exchanges
    #[tokio::test]
    async fn slow_replies_within_io_timeout_stay_online() {
        let io_timeout = Duration::from_millis(500);
        let slow = MockRconServer::start(
            MockBehavior::normal(TWO_PLAYERS).with_reply_delay(Duration::from_millis(440)),
        )
        .await;

        let (poller, _, _) = memory_poller(PollOptions::new(Duration::from_millis(100), io_timeout));
        let cluster = poller.poll(&[slow.descriptor("slow")]).await;

        let snapshot = cluster.get("slow").unwrap();
        assert_eq!(snapshot.status, ServerStatus::Online, "{:?}", snapshot.error_message);
        assert_eq!(snapshot.player_count, 2);
        assert_eq!(snapshot.max_players, 70);

        wait_for_release(&slow).await;
    }

    /// Tests that a stalled server is abandoned at its deadline
    #[tokio::test]
    async fn stalled_server_hits_deadline() {
        let good = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let stalled = MockRconServer::start(MockBehavior::normal("").with_mode(Mode::Stall)).await;

        let options = PollOptions::new(Duration::from_secs(5), Duration::from_secs(5))
            .with_deadline(Duration::from_millis(300));
        let (poller, _, _) = memory_poller(options);

        let started = Instant::now();
        let cluster = poller
            .poll(&[good.descriptor("good"), stalled.descriptor("stalled")])
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(cluster.get("good").unwrap().is_online());

        let snapshot = cluster.get("stalled").unwrap();
        assert_eq!(snapshot.status, ServerStatus::Offline);
        assert!(snapshot.error_message.as_deref().unwrap_or("").contains("timed out"));

        wait_for_release(&stalled).await;
    }

    /// Tests that an unparseable listing still counts the server as online
    #[tokio::test]
    async fn unparsed_listing_is_flagged() {
        let server = MockRconServer::start(MockBehavior::normal("garbage text")).await;
        let (poller, _, _) = memory_poller(fast_options());

        let cluster = poller.poll(&[server.descriptor("odd")]).await;
        let snapshot = cluster.get("odd").unwrap();
        assert!(snapshot.is_online());
        assert_eq!(snapshot.player_count, 0);
        assert!(!snapshot.players_parsed);
    }

    /// Tests that a missing player cap falls back to the default
    #[tokio::test]
    async fn missing_player_cap_uses_default() {
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS).with_diagnostic("nothing useful")).await;
        let (poller, _, _) = memory_poller(fast_options());

        let cluster = poller.poll(&[server.descriptor("a")]).await;
        assert_eq!(cluster.get("a").unwrap().max_players, rcon::DEFAULT_MAX_PLAYERS);
    }

    /// Tests the registry feeding the poller end to end
    #[tokio::test]
    async fn registry_to_snapshot() {
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let port = server.port().to_string();

        let vars = vec![
            ("ISLAND_NAME", "The Island"),
            ("ISLAND_IP", "127.0.0.1"),
            ("ISLAND_PORT", "7777"),
            ("ISLAND_RCON_PORT", port.as_str()),
            ("ISLAND_RCON_PASSWORD", PASSWORD),
            ("ISLAND_MAP", "TheIsland"),
            ("BROKEN_RCON_PORT", "27020"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let descriptors = load_descriptors(vars);
        assert_eq!(descriptors.len(), 1);

        let (poller, _, _) = memory_poller(fast_options());
        let cluster = poller.poll(&descriptors).await;
        let island = cluster.get("island").unwrap();
        assert_eq!(island.name, "The Island");
        assert_eq!(island.player_count, 2);
    }
}

/// PERSISTENCE TESTS
mod persistence_tests {
    use super::*;

    /// Tests that repeated cycles keep one row per server
    #[tokio::test]
    async fn repeated_cycles_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_status.json");
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let descriptors = vec![server.descriptor("a"), descriptor("b", closed_port().await)];

        {
            let sink = Arc::new(JsonFileStatusSink::open(&path).unwrap());
            let poller = FleetPoller::new(fast_options(), Arc::new(MemoryUptimeStore::new()), sink.clone());
            poller.poll(&descriptors).await;
            poller.poll(&descriptors).await;
            assert_eq!(sink.rows().unwrap().len(), 2);
        }

        let reopened = JsonFileStatusSink::open(&path).unwrap();
        let rows = reopened.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].server_key, "a");
        assert_eq!(rows[0].status, ServerStatus::Online);
        assert_eq!(rows[0].players_online, 2);
        assert_eq!(rows[1].status, ServerStatus::Offline);
    }

    /// Tests that uptime grows from a persisted reference
    #[tokio::test]
    async fn uptime_from_persisted_reference() {
        let dir = tempdir().unwrap();
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;

        let uptime = Arc::new(FileUptimeStore::new(dir.path()).unwrap());
        uptime.set("a", Utc::now() - ChronoDuration::seconds(600)).unwrap();

        let poller = FleetPoller::new(fast_options(), uptime, Arc::new(MemoryStatusSink::new()));
        let cluster = poller.poll(&[server.descriptor("a")]).await;

        let seconds = cluster.get("a").unwrap().uptime_seconds;
        assert!((600..700).contains(&seconds), "uptime {}", seconds);
    }

    /// Tests that the first sighting starts uptime at zero
    #[tokio::test]
    async fn first_sighting_starts_at_zero() {
        let server = MockRconServer::start(MockBehavior::normal(TWO_PLAYERS)).await;
        let (poller, sink, _) = memory_poller(fast_options());

        let cluster = poller.poll(&[server.descriptor("a")]).await;
        assert_eq!(cluster.get("a").unwrap().uptime_seconds, 0);
        assert_eq!(sink.get("a").unwrap().unwrap().uptime_seconds, 0);
    }
}

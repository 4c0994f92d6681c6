//! # Fleet Monitoring Library
//!
//! Periodically polls a fleet of game servers over RCON and folds the
//! results into one consistent view of the cluster.
//!
//! ## Core Responsibilities
//!
//! ### Isolated Polling
//! Every server is polled in its own task over its own connection, bounded
//! by its own deadline. A dead, misconfigured or stalled server turns into
//! an `Offline` entry with a reason; the rest of the fleet is unaffected and
//! a cycle always produces a complete snapshot.
//!
//! ### Aggregation
//! `ClusterSnapshot` is built from per-server snapshots only. Totals count
//! online servers and their players and are independent of poll order.
//!
//! ### Persistence
//! Two small seams keep state across cycles and restarts:
//! - `UptimeStore` remembers when each server was first seen online
//! - `StatusSink` keeps the latest row per server, upserted each cycle
//! - `EventSink` appends alerts and cluster metrics to an event log
//!
//! ### Notification
//! Alerts are recorded in the event log and, when `DISCORD_WEBHOOK_URL` is
//! set, posted to a Discord webhook.
//!
//! ## Module Organization
//!
//! - `model`: descriptors and snapshot types
//! - `poller`: concurrent fan-out with per-server deadlines
//! - `store`: uptime and status persistence, in memory or on disk
//! - `config`: server registry and daemon settings from the environment
//! - `alerts`: threshold checks over a finished cycle
//! - `notify`: event log and webhook delivery for alerts

pub mod alerts;
pub mod config;
pub mod model;
pub mod notify;
pub mod poller;
pub mod store;

pub use alerts::{evaluate, evaluate_cluster, Alert, AlertKind, AlertThresholds};
pub use config::{env_file_vars, load_descriptors, load_env_file, ConfigError, FleetConfig, RegistrySource};
pub use model::{ClusterMetrics, ClusterSnapshot, ServerDescriptor, ServerStatus, ServerStatusSnapshot};
pub use notify::{AlertDispatcher, DiscordNotifier, NotifyError, WEBHOOK_ENV};
pub use poller::{observe_server, FleetPoller, PollError, PollOptions, ServerObservation};
pub use store::{
    EventRecord, EventSink, FileUptimeStore, JsonFileStatusSink, JsonLinesEventSink, MemoryEventSink,
    MemoryStatusSink, MemoryUptimeStore, StatusRow, StatusSink, StoreError, UptimeStore,
};

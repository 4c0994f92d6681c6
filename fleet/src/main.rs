use chrono::{Local, Timelike};
use clap::Parser;
use fleet::{
    evaluate_cluster, load_env_file, AlertDispatcher, AlertThresholds, ClusterSnapshot, DiscordNotifier,
    FileUptimeStore, FleetConfig, FleetPoller, JsonFileStatusSink, JsonLinesEventSink, PollOptions,
    RegistrySource,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Main-method of the monitor.
/// Loads configuration, opens the state stores, then polls the fleet until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Environment file with the server registry
        #[clap(short, long)]
        env_file: Option<PathBuf>,
        /// Directory for uptime references and the status table
        #[clap(short, long)]
        state_dir: Option<PathBuf>,
        /// Seconds between poll cycles
        #[clap(short, long)]
        interval: Option<u64>,
        /// Seconds allowed to establish each RCON connection
        #[clap(long)]
        connect_timeout: Option<u64>,
        /// Seconds allowed for each packet read or write
        #[clap(long)]
        io_timeout: Option<u64>,
        /// Servers polled at the same time
        #[clap(long, default_value = "16")]
        max_in_flight: usize,
        /// Run a single cycle and exit
        #[clap(long)]
        once: bool,
        /// Print every cluster snapshot as JSON
        #[clap(long)]
        json: bool,
        /// Discord webhook for alerts, instead of DISCORD_WEBHOOK_URL
        #[clap(long)]
        webhook_url: Option<String>,
    }

    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info to see poll cycle summaries");
    }

    let args = Args::parse();

    let registry = RegistrySource::capture(args.env_file.clone());
    load_env_file(args.env_file.as_deref())?;
    let mut config = FleetConfig::from_vars(std::env::vars());

    if let Some(seconds) = args.interval {
        config.refresh_interval = Duration::from_secs(seconds.max(1));
    }
    if args.connect_timeout.is_some() || args.io_timeout.is_some() {
        let connect = args
            .connect_timeout
            .map(Duration::from_secs)
            .unwrap_or(config.poll.connect_timeout);
        let io = args.io_timeout.map(Duration::from_secs).unwrap_or(config.poll.io_timeout);
        config.poll = PollOptions::new(connect, io);
    }
    config.poll = config.poll.with_max_in_flight(args.max_in_flight);
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }

    let uptime = Arc::new(FileUptimeStore::new(config.state_dir.join("uptime"))?);
    let sink = Arc::new(JsonFileStatusSink::open(config.state_dir.join("server_status.json"))?);
    let events = Arc::new(JsonLinesEventSink::new(config.state_dir.join("events.jsonl")));
    info!("Persisting state under {:?}", config.state_dir);

    let webhook = match args.webhook_url {
        Some(url) => Some(DiscordNotifier::new(url)?),
        None => DiscordNotifier::from_vars(std::env::vars()),
    };

    let monitor = Monitor {
        registry,
        poller: FleetPoller::new(config.poll.clone(), uptime, sink),
        dispatcher: AlertDispatcher::new(events, webhook),
        thresholds: AlertThresholds::default(),
        json: args.json,
    };

    if args.once {
        monitor.run_cycle().await;
        return Ok(());
    }

    info!("Polling every {:?}", config.refresh_interval);
    let mut interval_timer = interval(config.refresh_interval);
    // A slow cycle delays the next one instead of stacking up
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                monitor.run_cycle().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Everything one poll cycle needs
struct Monitor {
    registry: RegistrySource,
    poller: FleetPoller,
    dispatcher: AlertDispatcher,
    thresholds: AlertThresholds,
    json: bool,
}

impl Monitor {
    /// Polls every registered server once and reports the result.
    async fn run_cycle(&self) {
        // Re-reads the env file, so registry edits apply on the next cycle
        let descriptors = self.registry.descriptors();
        if descriptors.is_empty() {
            warn!("No servers registered; set <PREFIX>_RCON_PORT and friends");
        }

        let cluster = self.poller.poll(&descriptors).await;

        let alerts = evaluate_cluster(&cluster, &self.thresholds, Local::now().hour());
        for alert in &alerts {
            warn!("[{}] {}: {}", alert.server_key, alert.kind, alert.message);
        }
        self.dispatcher.dispatch(&cluster, &alerts).await;

        if self.json {
            match serde_json::to_string(&cluster) {
                Ok(text) => println!("{}", text),
                Err(e) => error!("Failed to serialize cluster snapshot: {}", e),
            }
        } else {
            print_summary(&cluster);
        }
    }
}

fn print_summary(cluster: &ClusterSnapshot) {
    println!(
        "{} | {}/{} servers online ({:.0}%), {} players",
        cluster.generated_at.format("%Y-%m-%d %H:%M:%S"),
        cluster.online_servers,
        cluster.total_servers,
        cluster.availability_percent(),
        cluster.total_players
    );
    for snapshot in cluster.servers.values() {
        match &snapshot.error_message {
            Some(reason) => println!("  {:<16} {:<8} {}", snapshot.server_key, snapshot.status, reason),
            None => println!(
                "  {:<16} {:<8} {:>3}/{:<3} {:>5}ms  up {}s",
                snapshot.server_key,
                snapshot.status,
                snapshot.player_count,
                snapshot.max_players,
                snapshot.ping_ms,
                snapshot.uptime_seconds
            ),
        }
    }
}

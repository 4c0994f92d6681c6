use clap::{Parser, Subcommand};
use log::info;
use rcon::{RconConfig, RconSession};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run administrative commands over RCON", long_about = None)]
struct Args {
    /// Server host name or IP address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RCON port
    #[arg(short, long, default_value = "27020")]
    port: u16,

    /// RCON password
    #[arg(short = 'P', long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,

    /// Connect and per-packet timeout in seconds
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an arbitrary command and print the response
    Exec {
        #[arg(required = true)]
        command: Vec<String>,
    },
    /// List connected players
    Players,
    /// Measure command round-trip time
    Ping,
    /// Print the configured player cap
    MaxPlayers,
    /// Send a chat message to everyone on the server
    Broadcast {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Save the world
    SaveWorld,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=debug to trace the protocol exchange");
    }

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let config = RconConfig::new(args.host, args.port, args.password)
        .with_connect_timeout(timeout)
        .with_io_timeout(timeout);

    info!("Connecting to {}", config.address());
    let mut session = RconSession::open(&config).await?;

    let result = run_command(&mut session, args.command).await;
    session.close().await;
    result
}

async fn run_command(
    session: &mut RconSession,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Exec { command } => {
            let response = session.execute_command(&command.join(" ")).await?;
            println!("{}", response.trim_end());
        }
        Command::Players => {
            let listing = session.list_players().await;
            if !listing.is_observed() {
                eprintln!("Warning: player listing could not be read: {:?}", listing);
            }
            println!("{} player(s) online", listing.count());
            for player in listing.players() {
                println!("  {} ({})", player.name, player.identity);
            }
        }
        Command::Ping => {
            println!("{} ms", session.ping().await);
        }
        Command::MaxPlayers => {
            println!("{}", session.max_players().await);
        }
        Command::Broadcast { message } => {
            let response = session.broadcast(&message.join(" ")).await?;
            println!("{}", response.trim_end());
        }
        Command::SaveWorld => {
            let response = session.save_world().await?;
            println!("{}", response.trim_end());
        }
    }

    Ok(())
}

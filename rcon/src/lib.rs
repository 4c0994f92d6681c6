//! # RCON Client Library
//!
//! Client side of the remote console protocol used to administer game
//! servers over a private TCP port. Packet framing lives in the `protocol`
//! crate; this crate owns the connection and the commands.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! One authenticated connection to one server:
//! - Bounded connect, then an immediate password exchange
//! - Per-packet read/write timeouts
//! - Monotonic request ids, starting at 1
//! - Exactly-once release of the socket on every exit path
//!
//! ### Commands Module (`commands`)
//! Administrative operations on a ready session:
//! - Player listing parsed from free text, with an explicit `Unparsed` outcome
//! - Latency and player-cap checks that degrade to defaults instead of failing
//! - Broadcast and world-save actions that report their errors
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rcon::{RconConfig, RconSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RconConfig::new("10.0.0.5", 27020, "secret");
//!     let mut session = RconSession::open(&config).await?;
//!
//!     let listing = session.list_players().await;
//!     println!("{} players online", listing.count());
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod error;
pub mod session;

pub use commands::{
    parse_max_players, parse_player_list, PlayerListing, PlayerRecord, ServerInfo,
    DEFAULT_MAX_PLAYERS,
};
pub use error::RconError;
pub use session::{RconConfig, RconSession, SessionState};

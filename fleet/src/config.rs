//! Environment-driven configuration
//!
//! Servers are registered through prefixed variables, one group per server:
//!
//! ```text
//! ISLAND_NAME=The Island
//! ISLAND_IP=10.0.0.5
//! ISLAND_PORT=7777
//! ISLAND_QUERY_PORT=27015      # optional, defaults to the game port
//! ISLAND_RCON_PORT=27020
//! ISLAND_RCON_PASSWORD=secret
//! ISLAND_MAP=TheIsland
//! ISLAND_ENABLED=false         # optional
//! ```
//!
//! The prefix, lowercased, becomes the server key. Groups missing any
//! required variable are left out of the registry.

use crate::model::ServerDescriptor;
use crate::poller::{PollOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_STATE_DIR: &str = "./data";

/// Marks a variable group as a server entry
const RCON_PORT_SUFFIX: &str = "_RCON_PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file: {source}")]
    EnvFile {
        #[source]
        source: dotenvy::Error,
    },
}

/// Loads a `.env` style file into the process environment.
///
/// With no explicit path the default `.env` lookup is used and a missing
/// file is not an error. Variables already set are never overridden.
pub fn load_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|_| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if path.is_none() && e.not_found() => {
            debug!("No .env file found, using process environment only");
            Ok(())
        }
        Err(source) => Err(ConfigError::EnvFile { source }),
    }
}

/// Reads a `.env` style file without touching the process environment.
///
/// Same lookup rules as `load_env_file`: with no explicit path a missing
/// `.env` yields no variables.
pub fn env_file_vars(path: Option<&Path>) -> Result<Vec<(String, String)>, ConfigError> {
    let iter = match path {
        Some(path) => dotenvy::from_path_iter(path),
        None => dotenvy::dotenv_iter(),
    };

    let iter = match iter {
        Ok(iter) => iter,
        Err(e) if path.is_none() && e.not_found() => return Ok(Vec::new()),
        Err(source) => return Err(ConfigError::EnvFile { source }),
    };

    iter.collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::EnvFile { source })
}

/// Where the server registry comes from, re-read on every cycle.
///
/// Holds the process environment as it was before any `.env` file was
/// applied, so edits to the file show up on the next read while variables
/// set in the real environment keep precedence.
#[derive(Debug, Clone)]
pub struct RegistrySource {
    base: Vec<(String, String)>,
    env_file: Option<PathBuf>,
}

impl RegistrySource {
    /// Captures the current process environment. Call before `load_env_file`.
    pub fn capture(env_file: Option<PathBuf>) -> Self {
        Self::new(std::env::vars().collect(), env_file)
    }

    pub fn new(base: Vec<(String, String)>, env_file: Option<PathBuf>) -> Self {
        Self { base, env_file }
    }

    /// Current descriptors. An unreadable env file is logged and skipped.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        let file_vars = match env_file_vars(self.env_file.as_deref()) {
            Ok(vars) => vars,
            Err(e) => {
                warn!("Registry reload: {}", e);
                Vec::new()
            }
        };

        // Later entries win when collected, so the base environment goes last
        load_descriptors(file_vars.into_iter().chain(self.base.iter().cloned()))
    }
}

/// Builds the server registry from environment variables, sorted by key.
pub fn load_descriptors<I>(vars: I) -> Vec<ServerDescriptor>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: HashMap<String, String> = vars.into_iter().collect();

    let mut prefixes: Vec<&str> = vars
        .keys()
        .filter_map(|name| name.strip_suffix(RCON_PORT_SUFFIX))
        .filter(|prefix| !prefix.is_empty())
        .collect();
    prefixes.sort_unstable();
    prefixes.dedup();

    let mut registry = BTreeMap::new();
    for prefix in prefixes {
        if let Some(descriptor) = descriptor_from_vars(prefix, &vars) {
            registry.insert(descriptor.key.clone(), descriptor);
        }
    }
    registry.into_values().collect()
}

fn descriptor_from_vars(prefix: &str, vars: &HashMap<String, String>) -> Option<ServerDescriptor> {
    let get = |suffix: &str| field(vars, prefix, suffix);

    if let Some(enabled) = get("ENABLED") {
        if matches!(enabled.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off") {
            debug!("Server {} disabled", prefix);
            return None;
        }
    }

    let (name, host, game_port, rcon_port, password, map) = match (
        get("NAME"),
        get("IP"),
        get("PORT"),
        get("RCON_PORT"),
        get("RCON_PASSWORD"),
        get("MAP"),
    ) {
        (Some(name), Some(host), Some(port), Some(rcon_port), Some(password), Some(map)) => {
            (name, host, port, rcon_port, password, map)
        }
        _ => {
            debug!("Skipping incomplete server entry {}", prefix);
            return None;
        }
    };

    let parse_port = |suffix: &str, value: &str| match value.parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!("Skipping server {}: invalid {}_{} {:?}", prefix, prefix, suffix, value);
            None
        }
    };

    let game_port = parse_port("PORT", game_port)?;
    let rcon_port = parse_port("RCON_PORT", rcon_port)?;
    let query_port = match get("QUERY_PORT") {
        Some(value) => parse_port("QUERY_PORT", value)?,
        None => game_port,
    };

    Some(ServerDescriptor {
        key: prefix.to_ascii_lowercase(),
        name: name.to_string(),
        host: host.to_string(),
        game_port,
        query_port,
        rcon_port,
        rcon_password: password.to_string(),
        map_name: map.to_string(),
    })
}

fn field<'a>(vars: &'a HashMap<String, String>, prefix: &str, suffix: &str) -> Option<&'a str> {
    vars.get(&format!("{}_{}", prefix, suffix))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Daemon settings outside the server registry
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub refresh_interval: Duration,
    pub poll: PollOptions,
    pub state_dir: PathBuf,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            poll: PollOptions::default(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl FleetConfig {
    /// Reads `REFRESH_INTERVAL`, `RCON_CONNECT_TIMEOUT`, `RCON_IO_TIMEOUT`
    /// (all in seconds) and `STATE_DIR`. Invalid values fall back to the
    /// defaults with a warning.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let refresh = parse_var(&vars, "REFRESH_INTERVAL", DEFAULT_REFRESH_INTERVAL.as_secs());
        let connect = parse_var(&vars, "RCON_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT.as_secs());
        let io = parse_var(&vars, "RCON_IO_TIMEOUT", DEFAULT_IO_TIMEOUT.as_secs());

        let state_dir = vars
            .get("STATE_DIR")
            .map(|dir| dir.trim())
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_STATE_DIR);

        Self {
            refresh_interval: Duration::from_secs(refresh),
            poll: PollOptions::new(Duration::from_secs(connect), Duration::from_secs(io)),
            state_dir: PathBuf::from(state_dir),
        }
    }
}

/// Positive number of seconds with a fallback
fn parse_var(vars: &HashMap<String, String>, name: &str, default: u64) -> u64 {
    match vars.get(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("Invalid {} {:?}, using {}", name, raw, default);
                default
            }
        },
    }
}

//! In-process RCON server for exercising clients over real sockets

#![allow(dead_code)]

use fleet::ServerDescriptor;
use protocol::{read_packet, write_packet, Packet, PacketType, AUTH_FAILED_ID};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "hunter2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Authenticates and answers every command
    Normal,
    /// Answers the auth packet with id -1
    RejectAuth,
    /// Reads packets but never answers
    Stall,
}

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub mode: Mode,
    pub players: String,
    pub diagnostic: String,
    /// Pause before each reply
    pub reply_delay: Duration,
}

impl MockBehavior {
    pub fn normal(players: &str) -> Self {
        Self {
            mode: Mode::Normal,
            players: players.to_string(),
            diagnostic: "MaxPlayers: 70".to_string(),
            reply_delay: Duration::ZERO,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: &str) -> Self {
        self.diagnostic = diagnostic.to_string();
        self
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}

pub struct MockRconServer {
    addr: SocketAddr,
    open_connections: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockRconServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let open_connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let handle = {
            let open_connections = Arc::clone(&open_connections);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    open_connections.fetch_add(1, Ordering::SeqCst);

                    let behavior = behavior.clone();
                    let open_connections = Arc::clone(&open_connections);
                    tokio::spawn(async move {
                        serve(stream, &behavior).await;
                        open_connections.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            open_connections,
            accepted,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn descriptor(&self, key: &str) -> ServerDescriptor {
        descriptor(key, self.port())
    }
}

impl Drop for MockRconServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serves one client until it disconnects
async fn serve(mut stream: TcpStream, behavior: &MockBehavior) {
    while let Ok(request) = read_packet(&mut stream).await {
        let reply = match (behavior.mode, request.kind) {
            (Mode::Stall, _) => continue,
            (Mode::RejectAuth, PacketType::AUTH) => Packet::new(AUTH_FAILED_ID, PacketType::AUTH_RESPONSE, ""),
            (Mode::Normal, PacketType::AUTH) if request.body_text() == PASSWORD => {
                Packet::new(request.request_id, PacketType::AUTH_RESPONSE, "")
            }
            (_, PacketType::AUTH) => Packet::new(AUTH_FAILED_ID, PacketType::AUTH_RESPONSE, ""),
            _ => {
                let body = match request.body_text().as_str() {
                    "ListPlayers" => behavior.players.clone(),
                    "GetGameLog" => behavior.diagnostic.clone(),
                    _ => "Server received, But no response!!".to_string(),
                };
                Packet::new(request.request_id, PacketType::RESPONSE_VALUE, body)
            }
        };

        if !behavior.reply_delay.is_zero() {
            tokio::time::sleep(behavior.reply_delay).await;
        }
        if write_packet(&mut stream, &reply).await.is_err() {
            break;
        }
    }
}

pub fn descriptor(key: &str, rcon_port: u16) -> ServerDescriptor {
    ServerDescriptor {
        key: key.to_string(),
        name: format!("Server {}", key),
        host: "127.0.0.1".to_string(),
        game_port: 7777,
        query_port: 27015,
        rcon_port,
        rcon_password: PASSWORD.to_string(),
        map_name: "TheIsland".to_string(),
    }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

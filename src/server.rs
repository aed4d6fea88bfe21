/// Network session server
///
/// This module provides the TCP front end of the gateway: a line-oriented
/// command session per connection, all of them funneled through the shared
/// command translator onto the single module bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex, Semaphore};
use log::{info, error, debug, warn};

use crate::command::{CommandTranslator, SessionReply};
use crate::error::{HvlinkError, HvlinkResult};
use crate::protocol::{FAILURE_REPLY, SESSION_PROMPT};

/// Maximum bytes read from a client in one command
const MAX_COMMAND_SIZE: usize = 256;

/// Concurrent session limit when no configuration overrides it
const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections_count: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}

/// TCP session server for the gateway
///
/// Each accepted connection runs as its own task; the translator's bus
/// lock is what serializes their serial traffic. Sessions end on `_Q`,
/// on client disconnect, or when the server shuts down. Connections past
/// the session limit are closed at accept time.
pub struct GatewayServer {
    bind_address: SocketAddr,
    translator: Arc<CommandTranslator>,
    max_connections: usize,
    stats: Arc<Mutex<ServerStats>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    local_addr: Option<SocketAddr>,
    start_time: Option<Instant>,
}

impl GatewayServer {
    /// Create a server for the given bind address
    pub fn new(bind_address: SocketAddr, translator: CommandTranslator) -> Self {
        Self {
            bind_address,
            translator: Arc::new(translator),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            stats: Arc::new(Mutex::new(ServerStats::default())),
            shutdown_tx: None,
            local_addr: None,
            start_time: None,
        }
    }

    /// Override the concurrent session limit
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Start accepting sessions
    ///
    /// Binds the listener and spawns the accept loop, then returns; the
    /// server runs until [`stop`](Self::stop) is called.
    pub async fn start(&mut self) -> HvlinkResult<()> {
        if self.shutdown_tx.is_some() {
            return Err(HvlinkError::connection("Server is already running"));
        }

        let listener = TcpListener::bind(self.bind_address).await.map_err(|e| {
            HvlinkError::connection(format!("Failed to bind to {}: {}", self.bind_address, e))
        })?;
        let local_addr = listener.local_addr().map_err(HvlinkError::from)?;
        self.local_addr = Some(local_addr);

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.start_time = Some(Instant::now());

        info!("🚀 HV gateway listening on {}", local_addr);

        let translator = self.translator.clone();
        let stats = self.stats.clone();
        let max_connections = self.max_connections;
        let session_permits = Arc::new(Semaphore::new(max_connections));
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let permit = match session_permits.clone().try_acquire_owned() {
                                    Ok(permit) => permit,
                                    Err(_) => {
                                        warn!(
                                            "🚫 Refusing {}: session limit ({}) reached",
                                            addr, max_connections
                                        );
                                        drop(stream);
                                        continue;
                                    }
                                };
                                debug!("Accepted connection from {}", addr);

                                let translator = translator.clone();
                                let stats = stats.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_session(stream, translator, stats, shutdown_rx).await;
                                    drop(permit);
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Accept loop shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the server and disconnect all sessions
    pub async fn stop(&mut self) -> HvlinkResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        info!("⏹️  HV gateway stopped");
        Ok(())
    }

    /// Check if the server is accepting sessions
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// The address the listener actually bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get server statistics
    pub async fn get_stats(&self) -> ServerStats {
        let mut stats = self.stats.lock().await.clone();
        if let Some(start_time) = self.start_time {
            stats.uptime_seconds = start_time.elapsed().as_secs();
        }
        stats
    }

    /// Shared statistics handle for monitoring tasks
    pub fn stats_handle(&self) -> Arc<Mutex<ServerStats>> {
        Arc::clone(&self.stats)
    }

    /// Run one client session to completion
    async fn handle_session(
        mut stream: TcpStream,
        translator: Arc<CommandTranslator>,
        stats: Arc<Mutex<ServerStats>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!("📡 New client connected: {}", peer_addr);

        {
            let mut stats = stats.lock().await;
            stats.connections_count += 1;
        }

        let mut buffer = vec![0u8; MAX_COMMAND_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received for client {}", peer_addr);
                    break;
                }

                result = stream.read(&mut buffer) => {
                    match result {
                        Ok(0) => {
                            debug!("Client {} closed the connection", peer_addr);
                            break;
                        }
                        Ok(bytes_read) => {
                            {
                                let mut stats = stats.lock().await;
                                stats.total_requests += 1;
                                stats.bytes_received += bytes_read as u64;
                            }

                            let input = String::from_utf8_lossy(&buffer[..bytes_read]).into_owned();
                            let mut reply = match translator.execute(&input).await {
                                Ok(SessionReply::Quit) => {
                                    debug!("Client {} quit", peer_addr);
                                    break;
                                }
                                Ok(SessionReply::Text(text)) => {
                                    let mut stats = stats.lock().await;
                                    stats.successful_requests += 1;
                                    text
                                }
                                Err(e) => {
                                    if e.is_client_fault() {
                                        debug!("Rejected command from {}: {}", peer_addr, e);
                                    } else {
                                        warn!("Command from {} failed on the bus: {}", peer_addr, e);
                                    }
                                    let mut stats = stats.lock().await;
                                    stats.failed_requests += 1;
                                    FAILURE_REPLY.to_string()
                                }
                            };

                            // Every reply ends with the prompt, even failures
                            reply.push_str(SESSION_PROMPT);

                            if let Err(e) = stream.write_all(reply.as_bytes()).await {
                                error!("Failed to send reply to {}: {}", peer_addr, e);
                                break;
                            }
                            let mut stats = stats.lock().await;
                            stats.bytes_sent += reply.len() as u64;
                        }
                        Err(e) => {
                            error!("Read error from {}: {}", peer_addr, e);
                            break;
                        }
                    }
                }
            }
        }

        info!("🔌 Client {} disconnected", peer_addr);
    }
}

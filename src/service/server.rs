//! # Datagram Server Loop
//!
//! One UDP socket, one receive loop. Datagrams are handled strictly in
//! arrival order: decode, dispatch to the session engine, encode, reply to
//! the source address. A background reaper evicts idle sessions.
//!
//! ## Shutdown
//! The loop stops when the shutdown channel fires (or on SIGINT/SIGTERM via
//! [`BridgeServer::run`]). An in-flight request always completes first; then
//! the reaper stops and any active session is torn down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::core::codec::PacketCodec;
use crate::core::packet::{Command, Packet};
use crate::error::{constants, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::session::SessionEngine;
use crate::utils::metrics::Metrics;

pub struct BridgeServer {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    codec: PacketCodec,
    buffer_size: usize,
    reaper_interval: Duration,
    metrics: Arc<Metrics>,
}

impl BridgeServer {
    /// Bind the listening socket described by `config`
    pub async fn bind(
        config: &ServerConfig,
        transport: &TransportConfig,
        engine: Arc<SessionEngine>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.socket_addr()?).await?;
        let metrics = engine.metrics().clone();

        Ok(Self {
            socket,
            dispatcher: Dispatcher::new(engine),
            codec: PacketCodec::from_config(transport),
            buffer_size: config.buffer_size,
            reaper_interval: config.reaper_interval,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn engine(&self) -> &Arc<SessionEngine> {
        self.dispatcher.engine()
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            wait_for_signal().await;
            let _ = shutdown_tx.send(()).await;
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Serve until `shutdown_rx` receives a message or its sender is dropped
    #[instrument(skip(self, shutdown_rx), fields(address = ?self.socket.local_addr().ok()))]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let engine = self.engine().clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let reaper = spawn_reaper(engine.clone(), self.reaper_interval, stop_rx);

        info!(
            timeout_ms = engine.timeout().as_millis() as u64,
            buffer_size = self.buffer_size,
            "Bridge server started"
        );

        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down gracefully");
                    break;
                }
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        self.metrics.transport_error();
                        error!(error = %e, "Error reading from socket");
                        continue;
                    }
                }
            };

            self.metrics.datagram_received(len);
            let response = self.handle_datagram(&buffer[..len], peer).await;
            self.send_response(&response, peer).await;
        }

        let _ = stop_tx.send(true);
        if let Err(e) = reaper.await {
            warn!(error = %e, "Session reaper ended abnormally");
        }

        engine.shutdown().await;
        self.metrics.log_metrics();
        Ok(())
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr) -> Packet {
        match self.codec.decode(data) {
            Ok(packet) => {
                debug!(client = %peer, packet = %packet, "Packet received");
                self.dispatcher.dispatch(packet, peer).await
            }
            Err(e) => {
                self.metrics.decode_failure();
                error!(client = %peer, error = %e, "Error decoding packet");
                Packet::error(Command::Response, constants::ERR_INVALID_PACKET_FORMAT)
            }
        }
    }

    async fn send_response(&self, response: &Packet, peer: SocketAddr) {
        let bytes = match self.codec.encode(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(client = %peer, error = %e, "Error encoding response");
                match self.codec.encode(&Packet::from_error(&e)) {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
        };

        match self.socket.send_to(&bytes, peer).await {
            Ok(sent) => {
                self.metrics.datagram_sent(sent);
                debug!(client = %peer, bytes = sent, "Response sent");
            }
            Err(e) => {
                self.metrics.transport_error();
                error!(client = %peer, error = %e, "Error sending response");
            }
        }
    }
}

/// Periodically evict an idle-expired session until `stop` flips to true
fn spawn_reaper(
    engine: Arc<SessionEngine>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.reap_expired().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received CTRL+C signal"),
                    _ = terminate.recv() => info!("Received SIGTERM signal"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for CTRL+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received CTRL+C signal");
        }
    }
}

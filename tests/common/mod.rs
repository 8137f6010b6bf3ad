//! Shared helpers for the integration tests: a scripted card backend and a
//! bridge server bound to an ephemeral loopback port.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use euicc_bridge::config::{ServerConfig, TransportConfig};
use euicc_bridge::core::packet::{ConnectParams, Protocol};
use euicc_bridge::driver::{CardChannel, DriverRegistry};
use euicc_bridge::error::Result;
use euicc_bridge::protocol::session::SessionEngine;
use euicc_bridge::service::server::BridgeServer;
use euicc_bridge::transport::remote::RemoteChannel;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type CallLog = Arc<StdMutex<Vec<String>>>;

/// Card that answers every APDU with 9000 and records each call
pub struct FakeCard {
    log: CallLog,
}

impl FakeCard {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl CardChannel for FakeCard {
    async fn connect(&mut self) -> Result<()> {
        self.record("connect");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.record("disconnect");
        Ok(())
    }

    async fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        self.record(format!("transmit:{apdu:02X?}"));
        Ok(vec![0x90, 0x00])
    }

    async fn open_logical_channel(&mut self, _aid: &[u8]) -> Result<u8> {
        self.record("open");
        Ok(1)
    }

    async fn close_logical_channel(&mut self, channel: u8) -> Result<()> {
        self.record(format!("close:{channel}"));
        Ok(())
    }
}

pub struct TestBridge {
    pub addr: SocketAddr,
    pub engine: Arc<SessionEngine>,
    pub log: CallLog,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl TestBridge {
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Stop the server and wait for its loop to finish
    pub async fn stop(self) -> Vec<String> {
        self.shutdown.send(()).await.unwrap();
        self.handle.await.unwrap().unwrap();
        let calls = self.log.lock().unwrap().clone();
        calls
    }
}

/// Spawn a bridge on 127.0.0.1 with an ephemeral port
pub async fn spawn_bridge(session_timeout: Duration, reaper_interval: Duration) -> TestBridge {
    let log: CallLog = Arc::default();
    let mut registry = DriverRegistry::new();
    for protocol in [Protocol::At, Protocol::Mbim, Protocol::Qmi, Protocol::Qrtr] {
        let log = log.clone();
        registry.register(protocol, move |_params| {
            Ok(Box::new(FakeCard { log: log.clone() }) as Box<dyn CardChannel>)
        });
    }

    let engine = Arc::new(SessionEngine::with_timeout(registry, session_timeout));
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        bind_port: 0,
        session_timeout,
        reaper_interval,
        ..ServerConfig::default()
    };
    let server = BridgeServer::bind(&config, &TransportConfig::default(), engine.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(server.run_with_shutdown(shutdown_rx));

    TestBridge {
        addr,
        engine,
        log,
        shutdown,
        handle,
    }
}

pub fn client(bridge: &TestBridge) -> RemoteChannel {
    RemoteChannel::new(bridge.addr, ConnectParams::new("/dev/ttyUSB2", "at", 0))
        .with_response_timeout(Duration::from_secs(2))
}

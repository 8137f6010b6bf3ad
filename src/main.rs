//! euicc-bridge server entry point.
//!
//! ```text
//! euicc-bridge                           Serve on 0.0.0.0:8080
//! euicc-bridge --bind-port 9000 -t 120   Override port and idle timeout
//! euicc-bridge --config bridge.toml      Load settings from TOML
//! euicc-bridge --gen-config              Print the default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};

use euicc_bridge::config::BridgeConfig;
use euicc_bridge::driver::DriverRegistry;
use euicc_bridge::protocol::session::SessionEngine;
use euicc_bridge::service::server::BridgeServer;
use euicc_bridge::utils::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "euicc-bridge", about = "Share a local eUICC card channel over UDP")]
struct Cli {
    /// Path to a configuration TOML file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Binding address.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Binding port.
    #[arg(long)]
    bind_port: Option<u16>,

    /// Datagram buffer size in bytes.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Session idle timeout in seconds.
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<Level>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(addr) = &self.bind_addr {
            config.server.bind_address = addr.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }
        if let Some(size) = self.buffer_size {
            config.server.buffer_size = size;
        }
        if let Some(secs) = self.timeout {
            config.server.session_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = self.log_level {
            config.logging.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", BridgeConfig::example_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    config.apply_env()?;
    cli.apply(&mut config);
    config.validate_strict()?;

    init_logging(&config.logging)?;

    let registry = DriverRegistry::with_builtin();
    info!(protocols = ?registry.protocols(), "Drivers registered");

    let engine = Arc::new(SessionEngine::with_timeout(
        registry,
        config.server.session_timeout,
    ));
    let server = BridgeServer::bind(&config.server, &config.transport, engine).await?;
    info!(address = %server.local_addr()?, "Listening");

    server.run().await?;
    Ok(())
}

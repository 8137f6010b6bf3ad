//! # euicc-bridge
//!
//! Exposes a locally attached eUICC card channel to remote clients over UDP.
//!
//! ## Layout
//! - [`core`]: packet model and datagram codec
//! - [`protocol`]: single-tenant session engine and command dispatch
//! - [`service`]: the UDP server loop and idle-session reaper
//! - [`transport`]: client-side [`RemoteChannel`](transport::remote::RemoteChannel)
//! - [`driver`]: the card capability trait, driver registry and AT backend
//! - [`config`], [`error`], [`utils`]: configuration, errors, compression,
//!   logging and metrics
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use euicc_bridge::config::BridgeConfig;
//! use euicc_bridge::driver::DriverRegistry;
//! use euicc_bridge::protocol::session::SessionEngine;
//! use euicc_bridge::service::server::BridgeServer;
//!
//! # async fn demo() -> euicc_bridge::error::Result<()> {
//! let config = BridgeConfig::default();
//! let engine = Arc::new(SessionEngine::with_timeout(
//!     DriverRegistry::with_builtin(),
//!     config.server.session_timeout,
//! ));
//! let server = BridgeServer::bind(&config.server, &config.transport, engine).await?;
//! server.run().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

//! # Bridge Service
//!
//! The UDP server that puts the session engine on the network.

pub mod server;

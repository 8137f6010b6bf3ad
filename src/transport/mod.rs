//! # Client Transport
//!
//! Client-side adapters exposing a remote bridge as a local card channel.

pub mod remote;

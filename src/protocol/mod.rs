//! # Bridge Protocol Layer
//!
//! Server-side request handling on top of decoded packets.
//!
//! ## Components
//! - **Session**: the single-tenant session engine guarding the card
//! - **Dispatcher**: command-tag routing from packets to engine operations
//!
//! ## Request Flow
//! 1. The server loop decodes a datagram into a [`Packet`](crate::core::packet::Packet)
//! 2. The dispatcher matches the command tag and validates the packet shape
//! 3. The engine authenticates the origin, checks expiry and calls the card
//! 4. The result, or the error text, becomes the response packet

pub mod dispatcher;
pub mod session;

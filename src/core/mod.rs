//! # Core Protocol Components
//!
//! Packet model and the datagram codec.
//!
//! ## Components
//! - **Packet**: tagged `Plain | Body | Connect` packets over a shared header
//! - **Codec**: versioned, length-prefixed, optionally compressed frames
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Version(1)] [Flags(1)] [Body(N)]
//! ```
//!
//! ## Limits
//! - One packet per datagram, at most 65507 bytes on the wire
//! - Decompressed bodies are capped at the same size

pub mod codec;
pub mod packet;

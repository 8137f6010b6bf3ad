//! # Error Types
//!
//! Error handling for the bridge protocol, the session engine and the
//! client adapter.
//!
//! ## Error Categories
//! - **Codec Errors**: malformed or oversized datagrams
//! - **Session Errors**: busy, unauthorized, expired or missing sessions
//! - **Driver Errors**: whatever the card capability reports
//! - **Transport Errors**: socket read/write failures
//! - **Client Errors**: error strings returned by the server, malformed replies
//!
//! The `Display` text of the request-level variants is exactly what the
//! server puts in the `error` field of a response packet.
//!
//! ## Example Usage
//! ```rust
//! use euicc_bridge::error::{BridgeError, Result};
//!
//! fn require_apdu(apdu: &[u8]) -> Result<()> {
//!     if apdu.is_empty() {
//!         return Err(BridgeError::InvalidArgument("empty APDU".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_apdu(&[]).is_err());
//! ```

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants to avoid allocations on common error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_INVALID_MAGIC: &str = "invalid magic bytes";
    pub const ERR_TRUNCATED: &str = "truncated packet";
    pub const ERR_TRAILING_BYTES: &str = "trailing bytes after packet";
    pub const ERR_INVALID_UTF8: &str = "string field is not valid UTF-8";
    pub const ERR_DECOMPRESSION_FAILED: &str = "decompression failed";

    /// Request validation errors
    pub const ERR_EMPTY_AID: &str = "empty AID";
    pub const ERR_EMPTY_APDU: &str = "empty APDU";
    pub const ERR_INVALID_PACKET: &str = "invalid packet";
    pub const ERR_INVALID_PACKET_TYPE: &str = "invalid packet type";
    pub const ERR_INVALID_CONNECT_PACKET: &str = "invalid packet type for connect";

    /// Reply sent when a datagram cannot be decoded at all
    pub const ERR_INVALID_PACKET_FORMAT: &str = "invalid packet format";

    /// Client-side response validation
    pub const ERR_EMPTY_CHANNEL: &str = "openlogicalchannel: empty channel received";
    pub const ERR_NOT_CONNECTED: &str = "remote channel is not connected";
}

/// Primary error type for every bridge operation.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("device busy, in use by {0}")]
    Busy(SocketAddr),

    #[error("no active session, connect first")]
    NoActiveSession,

    #[error("unauthorized: session belongs to {0}")]
    Unauthorized(SocketAddr),

    #[error("session expired")]
    SessionExpired,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Driver(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("unknown command")]
    UnknownCommand,

    #[error("error on server: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Normalizes an error raised by a card capability into [`BridgeError::Driver`].
    ///
    /// Driver errors already in that shape pass through unchanged.
    pub fn into_driver(self) -> Self {
        match self {
            BridgeError::Driver(_) => self,
            other => BridgeError::Driver(other.to_string()),
        }
    }
}

/// Type alias for Results using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages() {
        let addr: SocketAddr = "10.0.0.5:9999".parse().unwrap();
        assert_eq!(
            BridgeError::Busy(addr).to_string(),
            "device busy, in use by 10.0.0.5:9999"
        );
        assert_eq!(
            BridgeError::Unauthorized(addr).to_string(),
            "unauthorized: session belongs to 10.0.0.5:9999"
        );
        assert_eq!(BridgeError::SessionExpired.to_string(), "session expired");
        assert_eq!(
            BridgeError::UnsupportedProtocol("nfc".into()).to_string(),
            "unsupported protocol: nfc"
        );
    }

    #[test]
    fn test_into_driver() {
        let err = BridgeError::Driver("modem gone".into()).into_driver();
        assert_eq!(err.to_string(), "modem gone");

        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = BridgeError::Transport(io).into_driver();
        assert!(matches!(err, BridgeError::Driver(ref msg) if msg.contains("pipe closed")));
    }
}

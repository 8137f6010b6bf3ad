//! # Card Channel Capability
//!
//! The narrow interface every card backend (AT, MBIM, QMI, QRTR, or another
//! bridge) implements, and the registry that turns a connect request into a
//! concrete backend.
//!
//! The session engine never sees a backend type; it only holds a
//! `Box<dyn CardChannel>` built by a registered factory.

pub mod at;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::core::packet::{ConnectParams, Protocol};
use crate::error::{BridgeError, Result};

/// Channel id meaning "no logical channel open".
///
/// Valid ids are 0-254 in practice; 0xFF is never handed out by a card.
pub const INVALID_CHANNEL: u8 = 0xFF;

/// Operations a card backend must provide.
#[async_trait]
pub trait CardChannel: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Send one command APDU and return the response APDU (data + SW1 SW2)
    async fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>>;

    /// Open a logical channel selecting the applet `aid`
    async fn open_logical_channel(&mut self, aid: &[u8]) -> Result<u8>;

    async fn close_logical_channel(&mut self, channel: u8) -> Result<()>;
}

type FactoryFn = dyn Fn(&ConnectParams) -> Result<Box<dyn CardChannel>> + Send + Sync + 'static;

/// Maps backend protocols to constructors.
pub struct DriverRegistry {
    factories: HashMap<Protocol, Box<FactoryFn>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl DriverRegistry {
    /// Empty registry; every connect fails with `UnsupportedProtocol`
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the backends built into this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::At, |params| {
            let channel = at::AtChannel::open(&params.device)?;
            Ok(Box::new(channel) as Box<dyn CardChannel>)
        });
        registry
    }

    pub fn register<F>(&mut self, protocol: Protocol, factory: F) -> &mut Self
    where
        F: Fn(&ConnectParams) -> Result<Box<dyn CardChannel>> + Send + Sync + 'static,
    {
        self.factories.insert(protocol, Box::new(factory));
        self
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.factories.keys().copied().collect();
        protocols.sort_by_key(|p| p.as_str());
        protocols
    }

    /// Build an unconnected backend for the requested protocol.
    ///
    /// # Errors
    /// `UnsupportedProtocol` for unknown or unregistered names; whatever
    /// the factory reports otherwise.
    pub fn build(&self, params: &ConnectParams) -> Result<Box<dyn CardChannel>> {
        let protocol: Protocol = params.protocol.parse()?;
        let factory = self
            .factories
            .get(&protocol)
            .ok_or_else(|| BridgeError::UnsupportedProtocol(params.protocol.clone()))?;
        factory(params)
    }
}

/// Upper-case hex rendering used by AT commands and logs
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

pub(crate) fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullChannel;

    #[async_trait]
    impl CardChannel for NullChannel {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn transmit(&mut self, _apdu: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0x90, 0x00])
        }
        async fn open_logical_channel(&mut self, _aid: &[u8]) -> Result<u8> {
            Ok(1)
        }
        async fn close_logical_channel(&mut self, _channel: u8) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = DriverRegistry::new();
        let result = registry.build(&ConnectParams::new("", "bluetooth", 0));
        assert!(matches!(result, Err(BridgeError::UnsupportedProtocol(ref p)) if p == "bluetooth"));
    }

    #[test]
    fn test_unregistered_protocol() {
        let mut registry = DriverRegistry::new();
        registry.register(Protocol::At, |_| Ok(Box::new(NullChannel) as Box<dyn CardChannel>));

        assert!(registry.build(&ConnectParams::new("", "at", 0)).is_ok());
        assert!(matches!(
            registry.build(&ConnectParams::new("", "mbim", 0)),
            Err(BridgeError::UnsupportedProtocol(_))
        ));
        assert_eq!(registry.protocols(), vec![Protocol::At]);
    }

    #[test]
    fn test_builtin_at_reports_missing_device() {
        let registry = DriverRegistry::with_builtin();
        let result = registry.build(&ConnectParams::new("/nonexistent/ttyUSB9", "at", 0));
        assert!(matches!(result, Err(BridgeError::Driver(_))));
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x00, 0xA4, 0x04, 0x00]), "00A40400");
        assert_eq!(from_hex("9000"), Some(vec![0x90, 0x00]));
        assert_eq!(from_hex("6a82"), Some(vec![0x6A, 0x82]));
        assert_eq!(from_hex("900"), None);
        assert_eq!(from_hex("zz"), None);
        assert_eq!(from_hex(""), Some(vec![]));
    }
}

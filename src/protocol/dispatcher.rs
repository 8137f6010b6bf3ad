use std::net::SocketAddr;
use std::sync::Arc;

use tracing::warn;

use crate::core::packet::{Command, Packet};
use crate::error::{constants, BridgeError, Result};
use crate::protocol::session::SessionEngine;

/// Routes decoded request packets to the session engine by command tag.
///
/// Every request yields exactly one response packet: the operation's
/// result, a plain acknowledgement, or an error packet.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<SessionEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.engine
    }

    pub async fn dispatch(&self, packet: Packet, origin: SocketAddr) -> Packet {
        let command = packet.command();
        match self.handle(packet, origin).await {
            Ok(response) => response,
            Err(e) => {
                self.engine.metrics().request_error();
                warn!(client = %origin, command = %command, error = %e, "Request failed");
                Packet::from_error(&e)
            }
        }
    }

    async fn handle(&self, packet: Packet, origin: SocketAddr) -> Result<Packet> {
        match packet.command() {
            Command::Connect => {
                let Packet::Connect { params, .. } = packet else {
                    return Err(invalid(constants::ERR_INVALID_CONNECT_PACKET));
                };
                self.engine.connect(&params, origin).await?;
                Ok(Packet::ack())
            }
            Command::Disconnect => {
                self.engine.disconnect(origin).await?;
                Ok(Packet::ack())
            }
            Command::OpenLogical => {
                let aid = self
                    .body_of(packet, origin, constants::ERR_INVALID_PACKET_TYPE)
                    .await?;
                let channel = self.engine.open_logical_channel(&aid, origin).await?;
                Ok(Packet::body(Command::Response, vec![channel]))
            }
            Command::CloseLogical => {
                let body = self
                    .body_of(packet, origin, constants::ERR_INVALID_PACKET)
                    .await?;
                let Some(&channel) = body.first() else {
                    self.engine.check_auth(origin).await?;
                    return Err(invalid(constants::ERR_INVALID_PACKET));
                };
                self.engine.close_logical_channel(channel, origin).await?;
                Ok(Packet::ack())
            }
            Command::Transmit => {
                let apdu = self
                    .body_of(packet, origin, constants::ERR_INVALID_PACKET_TYPE)
                    .await?;
                let response = self.engine.transmit(&apdu, origin).await?;
                Ok(Packet::body(Command::Response, response))
            }
            Command::Response => Err(BridgeError::UnknownCommand),
        }
    }

    /// Payload of a body packet.
    ///
    /// A misshapen request is only reported to the session owner; anyone
    /// else gets the authorization error first.
    async fn body_of(&self, packet: Packet, origin: SocketAddr, reason: &str) -> Result<Vec<u8>> {
        match packet {
            Packet::Body { payload, .. } => Ok(payload),
            _ => {
                self.engine.check_auth(origin).await?;
                Err(invalid(reason))
            }
        }
    }
}

fn invalid(reason: &str) -> BridgeError {
    BridgeError::InvalidArgument(reason.to_string())
}

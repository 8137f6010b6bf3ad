//! # Remote Channel
//!
//! Client side of the bridge: a [`CardChannel`] whose every call is one
//! request/response round trip to a bridge server over UDP.
//!
//! There is no retry at this layer. A lost datagram surfaces as a
//! transport error (timeout) and the caller decides what to do. Replies are
//! not tagged with a request id; any late reply still queued on the socket is
//! discarded before the next request goes out.
//!
//! ## Usage
//! ```no_run
//! use euicc_bridge::core::packet::ConnectParams;
//! use euicc_bridge::driver::CardChannel;
//! use euicc_bridge::transport::remote::RemoteChannel;
//!
//! # async fn demo() -> euicc_bridge::error::Result<()> {
//! let params = ConnectParams::new("/dev/ttyUSB2", "at", 0);
//! let mut card = RemoteChannel::resolve("192.168.1.20:8080", params).await?;
//! card.connect().await?;
//! let response = card.transmit(&[0x80, 0xE2, 0x91, 0x00, 0x00]).await?;
//! card.disconnect().await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};

use crate::config::{ClientConfig, DEFAULT_BUFFER_SIZE, DEFAULT_RESPONSE_TIMEOUT};
use crate::core::codec::PacketCodec;
use crate::core::packet::{Command, ConnectParams, Packet};
use crate::driver::CardChannel;
use crate::error::{constants, BridgeError, Result};

pub struct RemoteChannel {
    server: SocketAddr,
    params: ConnectParams,
    buffer_size: usize,
    response_timeout: Duration,
    codec: PacketCodec,
    socket: Option<UdpSocket>,
}

impl RemoteChannel {
    pub fn new(server: SocketAddr, params: ConnectParams) -> Self {
        Self {
            server,
            params,
            buffer_size: DEFAULT_BUFFER_SIZE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            codec: PacketCodec::default(),
            socket: None,
        }
    }

    /// Resolve `server` ("host:port") and build an unconnected channel
    pub async fn resolve(server: &str, params: ConnectParams) -> Result<Self> {
        let addr = lookup_host(server)
            .await?
            .next()
            .ok_or_else(|| BridgeError::Config(format!("error resolving address: {server}")))?;
        Ok(Self::new(addr, params))
    }

    /// Build from the `[client]` config section
    pub async fn from_config(config: &ClientConfig, params: ConnectParams) -> Result<Self> {
        Ok(Self::resolve(&config.server_address, params)
            .await?
            .with_buffer_size(config.buffer_size)
            .with_response_timeout(config.response_timeout))
    }

    /// Receive buffer size; a zero size falls back to the default
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = if size == 0 { DEFAULT_BUFFER_SIZE } else { size };
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_codec(mut self, codec: PacketCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Local endpoint, once connected
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Send one request and return the response payload, if any.
    async fn round_trip(&self, request: &Packet) -> Result<Option<Vec<u8>>> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            BridgeError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                constants::ERR_NOT_CONNECTED,
            ))
        })?;

        let bytes = self.codec.encode(request)?;
        let mut buffer = vec![0u8; self.buffer_size];

        // late replies to requests that already timed out
        let mut stale = 0usize;
        while socket.try_recv(&mut buffer).is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(server = %self.server, stale, "Discarded late responses");
        }

        socket.send(&bytes).await?;

        let len = tokio::time::timeout(self.response_timeout, socket.recv(&mut buffer))
            .await
            .map_err(|_| {
                BridgeError::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no response to {} from {}", request.command(), self.server),
                ))
            })??;

        let response = self.codec.decode(&buffer[..len])?;
        debug!(server = %self.server, response = %response, "Response received");

        if let Some(message) = response.error_message() {
            return Err(BridgeError::Remote(message.to_string()));
        }
        Ok(response.payload().map(<[u8]>::to_vec))
    }
}

#[async_trait]
impl CardChannel for RemoteChannel {
    async fn connect(&mut self) -> Result<()> {
        debug!(server = %self.server, "Dialing bridge server");
        let local: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.server).await?;
        self.socket = Some(socket);

        let result = self
            .round_trip(&Packet::connect(self.params.clone()))
            .await
            .map(|_| ());
        if result.is_err() {
            self.socket = None;
        }
        result
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.socket.is_none() {
            return Ok(());
        }

        let result = self
            .round_trip(&Packet::plain(Command::Disconnect))
            .await
            .map(|_| ());
        if let Err(e) = &result {
            warn!(server = %self.server, error = %e, "Disconnect notification failed");
        }
        self.socket = None;
        result
    }

    async fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        let payload = self
            .round_trip(&Packet::body(Command::Transmit, apdu.to_vec()))
            .await?;
        Ok(payload.unwrap_or_default())
    }

    async fn open_logical_channel(&mut self, aid: &[u8]) -> Result<u8> {
        let payload = self
            .round_trip(&Packet::body(Command::OpenLogical, aid.to_vec()))
            .await?;
        match payload.as_deref() {
            Some([channel]) => Ok(*channel),
            _ => Err(BridgeError::Protocol(constants::ERR_EMPTY_CHANNEL.to_string())),
        }
    }

    async fn close_logical_channel(&mut self, channel: u8) -> Result<()> {
        self.round_trip(&Packet::body(Command::CloseLogical, vec![channel]))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{decode, encode};

    /// Answer each incoming datagram with the next scripted packet
    async fn scripted_server(replies: Vec<Packet>) -> (SocketAddr, tokio::task::JoinHandle<Vec<Packet>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = vec![0u8; 2048];
            for reply in replies {
                let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
                seen.push(decode(&buf[..len]).unwrap());
                socket.send_to(&encode(&reply).unwrap(), peer).await.unwrap();
            }
            seen
        });
        (addr, handle)
    }

    fn params() -> ConnectParams {
        ConnectParams::new("/dev/ttyUSB0", "at", 0)
    }

    #[tokio::test]
    async fn test_calls_map_to_packets() {
        let (addr, server) = scripted_server(vec![
            Packet::ack(),
            Packet::body(Command::Response, vec![0x90, 0x00]),
            Packet::body(Command::Response, vec![2]),
            Packet::ack(),
            Packet::ack(),
        ])
        .await;

        let mut card = RemoteChannel::new(addr, params());
        card.connect().await.unwrap();
        assert!(card.is_connected());
        assert_eq!(card.transmit(&[0x00, 0xA4, 0x04, 0x00]).await.unwrap(), vec![0x90, 0x00]);
        assert_eq!(card.open_logical_channel(&[0xA0]).await.unwrap(), 2);
        card.close_logical_channel(2).await.unwrap();
        card.disconnect().await.unwrap();
        assert!(!card.is_connected());

        let seen = server.await.unwrap();
        assert_eq!(seen[0], Packet::connect(params()));
        assert_eq!(seen[1], Packet::body(Command::Transmit, vec![0x00, 0xA4, 0x04, 0x00]));
        assert_eq!(seen[2], Packet::body(Command::OpenLogical, vec![0xA0]));
        assert_eq!(seen[3], Packet::body(Command::CloseLogical, vec![2]));
        assert_eq!(seen[4], Packet::plain(Command::Disconnect));
    }

    #[tokio::test]
    async fn test_server_error_becomes_remote_error() {
        let (addr, _server) = scripted_server(vec![Packet::error(
            Command::Response,
            "device busy, in use by 10.0.0.5:9999",
        )])
        .await;

        let mut card = RemoteChannel::new(addr, params());
        let err = card.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::Remote(ref m) if m.contains("device busy")));
        assert!(!card.is_connected());
        assert!(card.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_the_next_one() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let (_, peer) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(&encode(&Packet::ack()).unwrap(), peer).await.unwrap();

            // answer the first transmit only after the client gave up on it
            socket.recv_from(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            let late = Packet::body(Command::Response, vec![0x6A, 0x82]);
            socket.send_to(&encode(&late).unwrap(), peer).await.unwrap();

            let (len, _) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(
                decode(&buf[..len]).unwrap(),
                Packet::body(Command::Transmit, vec![0x00, 0xB0])
            );
            let fresh = Packet::body(Command::Response, vec![0x90, 0x00]);
            socket.send_to(&encode(&fresh).unwrap(), peer).await.unwrap();
        });

        let mut card = RemoteChannel::new(addr, params())
            .with_response_timeout(Duration::from_millis(50));
        card.connect().await.unwrap();

        let err = card.transmit(&[0x00, 0xA4]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(ref e) if e.kind() == io::ErrorKind::TimedOut));

        // let the late reply land in the socket queue
        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut card = card.with_response_timeout(Duration::from_secs(2));
        assert_eq!(card.transmit(&[0x00, 0xB0]).await.unwrap(), vec![0x90, 0x00]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_channel_requires_single_byte() {
        let (addr, _server) = scripted_server(vec![
            Packet::ack(),
            Packet::body(Command::Response, vec![1, 2]),
            Packet::ack(),
        ])
        .await;

        let mut card = RemoteChannel::new(addr, params());
        card.connect().await.unwrap();
        assert!(matches!(
            card.open_logical_channel(&[0xA0]).await,
            Err(BridgeError::Protocol(_))
        ));
        assert!(matches!(
            card.open_logical_channel(&[0xA0]).await,
            Err(BridgeError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_releases_socket_on_failure() {
        let (addr, _server) = scripted_server(vec![
            Packet::ack(),
            Packet::error(Command::Response, "no active session, connect first"),
        ])
        .await;

        let mut card = RemoteChannel::new(addr, params());
        card.connect().await.unwrap();
        assert!(card.disconnect().await.is_err());
        assert!(!card.is_connected());
        // a second disconnect is a no-op
        card.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_response_is_transport_error() {
        // bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut card = RemoteChannel::new(silent.local_addr().unwrap(), params())
            .with_response_timeout(Duration::from_millis(50));

        let err = card.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(ref e) if e.kind() == io::ErrorKind::TimedOut));
        assert!(!card.is_connected());
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let mut card = RemoteChannel::new("127.0.0.1:9".parse().unwrap(), params());
        assert!(matches!(
            card.transmit(&[0x00]).await,
            Err(BridgeError::Transport(ref e)) if e.kind() == io::ErrorKind::NotConnected
        ));
    }

    #[test]
    fn test_zero_buffer_size_uses_default() {
        let card = RemoteChannel::new("127.0.0.1:9".parse().unwrap(), params()).with_buffer_size(0);
        assert_eq!(card.buffer_size, DEFAULT_BUFFER_SIZE);
    }
}

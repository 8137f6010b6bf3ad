//! Datagram codec for bridge packets.
//!
//! Every datagram is one self-contained frame:
//!
//! ```text
//! [Magic(4)] [Version(1)] [Flags(1)] [Body(N)]
//! ```
//!
//! `Flags` names the compressor applied to `Body` (0 = none, 1 = LZ4,
//! 2 = Zstd); all other bits must be zero. Once decompressed, the body is a
//! tagged union with big-endian length prefixes:
//!
//! ```text
//! [Shape(1)] [Command(1)] [ErrLen(2)] [Err]
//!   Shape 0 (plain):   -
//!   Shape 1 (body):    [PayloadLen(4)] [Payload]
//!   Shape 2 (connect): [DevLen(2)] [Device] [ProtoLen(2)] [Protocol] [Slot(1)]
//! ```
//!
//! Decoding treats its input as untrusted: every length is checked against
//! the remaining bytes and trailing garbage is rejected.

use bytes::{Buf, BufMut, BytesMut};

use crate::config::{
    TransportConfig, DEFAULT_COMPRESSION_THRESHOLD, MAGIC_BYTES, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use crate::core::packet::{Command, ConnectParams, Header, Packet};
use crate::error::{constants, BridgeError, Result};
use crate::utils::compression::{self, CompressionKind};

const FRAME_HEADER_LEN: usize = MAGIC_BYTES.len() + 2;
const FLAG_COMPRESSION_MASK: u8 = 0x03;

const SHAPE_PLAIN: u8 = 0;
const SHAPE_BODY: u8 = 1;
const SHAPE_CONNECT: u8 = 2;

/// Encoder/decoder pair with a configurable compression policy.
///
/// Decoding accepts any compressor regardless of the local policy; the
/// policy only decides what `encode` emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    compression: Option<CompressionKind>,
    threshold_bytes: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            compression: Some(CompressionKind::Lz4),
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl PacketCodec {
    pub fn new(compression: Option<CompressionKind>, threshold_bytes: usize) -> Self {
        Self {
            compression,
            threshold_bytes,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        let compression = config
            .compression_enabled
            .then_some(config.compression_kind);
        Self::new(compression, config.compression_threshold_bytes)
    }

    /// Serialize a packet into one datagram.
    ///
    /// # Errors
    /// `BridgeError::Serialization` when a field does not fit its length
    /// prefix or the frame would exceed the datagram ceiling.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>> {
        let body = encode_body(packet)?;

        let (body, flags) = match self.compression {
            Some(kind) => match compression::maybe_compress(&body, kind, self.threshold_bytes)? {
                (out, true) => (out, kind.flag()),
                (out, false) => (out, 0),
            },
            None => (body, 0),
        };

        let total = FRAME_HEADER_LEN + body.len();
        if total > MAX_PAYLOAD_SIZE {
            return Err(BridgeError::Serialization(format!(
                "frame of {total} bytes exceeds datagram limit of {MAX_PAYLOAD_SIZE}"
            )));
        }

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&MAGIC_BYTES);
        frame.push(PROTOCOL_VERSION);
        frame.push(flags);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse one datagram.
    ///
    /// # Errors
    /// `BridgeError::MalformedPacket` for anything that is not a complete,
    /// well-formed frame.
    pub fn decode(&self, data: &[u8]) -> Result<Packet> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(malformed(constants::ERR_TRUNCATED));
        }
        if data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
            return Err(malformed(constants::ERR_INVALID_MAGIC));
        }

        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(BridgeError::MalformedPacket(format!(
                "unsupported version {version}"
            )));
        }

        let flags = data[5];
        if flags & !FLAG_COMPRESSION_MASK != 0 {
            return Err(BridgeError::MalformedPacket(format!(
                "unknown flags 0x{flags:02X}"
            )));
        }

        let raw = &data[FRAME_HEADER_LEN..];
        match flags & FLAG_COMPRESSION_MASK {
            0 => decode_body(raw),
            flag => {
                let kind = CompressionKind::from_flag(flag).ok_or_else(|| {
                    BridgeError::MalformedPacket(format!("unknown compression flag {flag}"))
                })?;
                decode_body(&compression::decompress(raw, kind)?)
            }
        }
    }
}

/// Encode with the default codec (LZ4 above the default threshold).
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    PacketCodec::default().encode(packet)
}

/// Decode a datagram produced by any codec configuration.
pub fn decode(data: &[u8]) -> Result<Packet> {
    PacketCodec::default().decode(data)
}

fn malformed(reason: &str) -> BridgeError {
    BridgeError::MalformedPacket(reason.to_string())
}

fn encode_body(packet: &Packet) -> Result<Vec<u8>> {
    let header = packet.header();
    let mut buf = BytesMut::with_capacity(64);

    let shape = match packet {
        Packet::Plain(_) => SHAPE_PLAIN,
        Packet::Body { .. } => SHAPE_BODY,
        Packet::Connect { .. } => SHAPE_CONNECT,
    };
    buf.put_u8(shape);
    buf.put_u8(header.command.code());
    put_str(&mut buf, "error", &header.error)?;

    match packet {
        Packet::Plain(_) => {}
        Packet::Body { payload, .. } => {
            if payload.len() > MAX_PAYLOAD_SIZE {
                return Err(BridgeError::Serialization(format!(
                    "payload of {} bytes exceeds limit",
                    payload.len()
                )));
            }
            buf.put_u32(payload.len() as u32);
            buf.put_slice(payload);
        }
        Packet::Connect { params, .. } => {
            put_str(&mut buf, "device", &params.device)?;
            put_str(&mut buf, "protocol", &params.protocol)?;
            buf.put_u8(params.slot);
        }
    }

    Ok(buf.to_vec())
}

fn put_str(buf: &mut BytesMut, field: &str, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        BridgeError::Serialization(format!("{field} field too long ({} bytes)", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn decode_body(mut buf: &[u8]) -> Result<Packet> {
    let shape = take_u8(&mut buf)?;
    let code = take_u8(&mut buf)?;
    let command = Command::from_code(code)
        .ok_or_else(|| BridgeError::MalformedPacket(format!("unknown command 0x{code:02X}")))?;
    let error = take_str(&mut buf)?;
    let header = Header { command, error };

    let packet = match shape {
        SHAPE_PLAIN => Packet::Plain(header),
        SHAPE_BODY => {
            let len = take_u32(&mut buf)? as usize;
            let payload = take_bytes(&mut buf, len)?.to_vec();
            Packet::Body { header, payload }
        }
        SHAPE_CONNECT => {
            let device = take_str(&mut buf)?;
            let protocol = take_str(&mut buf)?;
            let slot = take_u8(&mut buf)?;
            Packet::Connect {
                header,
                params: ConnectParams {
                    device,
                    protocol,
                    slot,
                },
            }
        }
        other => {
            return Err(BridgeError::MalformedPacket(format!(
                "unknown packet shape {other}"
            )))
        }
    };

    if buf.has_remaining() {
        return Err(malformed(constants::ERR_TRAILING_BYTES));
    }
    Ok(packet)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(malformed(constants::ERR_TRUNCATED));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(malformed(constants::ERR_TRUNCATED));
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(malformed(constants::ERR_TRUNCATED));
    }
    Ok(buf.get_u32())
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    let slice: &'a [u8] = buf;
    if slice.len() < len {
        return Err(malformed(constants::ERR_TRUNCATED));
    }
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_str(buf: &mut &[u8]) -> Result<String> {
    let len = take_u16(buf)? as usize;
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| malformed(constants::ERR_INVALID_UTF8))
}

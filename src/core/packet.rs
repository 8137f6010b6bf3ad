use std::fmt;

use crate::error::{BridgeError, Result};

/// Operation carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Disconnect,
    OpenLogical,
    CloseLogical,
    Transmit,
    Response,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Connect,
        Command::Disconnect,
        Command::OpenLogical,
        Command::CloseLogical,
        Command::Transmit,
        Command::Response,
    ];

    /// Wire identifier of the command
    pub fn code(self) -> u8 {
        match self {
            Command::Connect => 0x01,
            Command::Disconnect => 0x02,
            Command::OpenLogical => 0x03,
            Command::CloseLogical => 0x04,
            Command::Transmit => 0x05,
            Command::Response => 0x06,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.code() == code)
    }

    /// Short mnemonic used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "conn",
            Command::Disconnect => "disc",
            Command::OpenLogical => "opch",
            Command::CloseLogical => "clch",
            Command::Transmit => "tran",
            Command::Response => "resp",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header shared by every packet shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    /// Empty on success
    pub error: String,
}

impl Header {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            error: String::new(),
        }
    }
}

/// Backend protocol a connect request asks the server to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    At,
    Mbim,
    Qmi,
    Qrtr,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::At => "at",
            Protocol::Mbim => "mbim",
            Protocol::Qmi => "qmi",
            Protocol::Qrtr => "qrtr",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "at" => Ok(Protocol::At),
            "mbim" => Ok(Protocol::Mbim),
            "qmi" => Ok(Protocol::Qmi),
            "qrtr" => Ok(Protocol::Qrtr),
            other => Err(BridgeError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a connect request.
///
/// The protocol travels as a free-form string so that a server can report
/// names it does not know instead of failing to decode the packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectParams {
    /// Device path, empty for backends that do not need one (qrtr)
    pub device: String,
    pub protocol: String,
    pub slot: u8,
}

impl ConnectParams {
    pub fn new(device: impl Into<String>, protocol: impl Into<String>, slot: u8) -> Self {
        Self {
            device: device.into(),
            protocol: protocol.into(),
            slot,
        }
    }
}

/// Unit of exchange between client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Header only: disconnect requests, empty acknowledgements, bare errors
    Plain(Header),
    /// Header plus opaque bytes: AIDs, channel ids, APDUs and their responses
    Body { header: Header, payload: Vec<u8> },
    /// Connect request
    Connect {
        header: Header,
        params: ConnectParams,
    },
}

impl Packet {
    pub fn plain(command: Command) -> Self {
        Packet::Plain(Header::new(command))
    }

    pub fn error(command: Command, message: impl Into<String>) -> Self {
        Packet::Plain(Header {
            command,
            error: message.into(),
        })
    }

    pub fn body(command: Command, payload: Vec<u8>) -> Self {
        Packet::Body {
            header: Header::new(command),
            payload,
        }
    }

    pub fn connect(params: ConnectParams) -> Self {
        Packet::Connect {
            header: Header::new(Command::Connect),
            params,
        }
    }

    /// Success acknowledgement with no payload
    pub fn ack() -> Self {
        Self::plain(Command::Response)
    }

    /// Response carrying the display text of `err`
    pub fn from_error(err: &BridgeError) -> Self {
        Self::error(Command::Response, err.to_string())
    }

    pub fn header(&self) -> &Header {
        match self {
            Packet::Plain(header) => header,
            Packet::Body { header, .. } => header,
            Packet::Connect { header, .. } => header,
        }
    }

    pub fn command(&self) -> Command {
        self.header().command
    }

    /// Error text, `None` when the packet reports success
    pub fn error_message(&self) -> Option<&str> {
        let error = self.header().error.as_str();
        (!error.is_empty()).then_some(error)
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    /// Payload bytes of a body packet. Error packets never expose a payload.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Packet::Body { payload, .. } if !self.is_error() => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        write!(f, "Cmd: {}", header.command)?;
        if !header.error.is_empty() {
            write!(f, ", Err: {}", header.error)?;
        }
        match self {
            Packet::Plain(_) => Ok(()),
            Packet::Body { payload, .. } => {
                write!(f, ", Body(size): {:4}, Body(hex): ", payload.len())?;
                payload.iter().try_for_each(|b| write!(f, "{b:02X}"))
            }
            Packet::Connect { params, .. } => write!(
                f,
                ", Device: {}, Proto: {}, Slot: {}",
                params.device, params.protocol, params.slot
            ),
        }
    }
}

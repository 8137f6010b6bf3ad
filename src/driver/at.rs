//! AT command backend (3GPP TS 27.007).
//!
//! Speaks to a modem's command port over any async byte stream:
//! `ATE0` on connect, `AT+CCHO` / `AT+CCHC` for logical channels, `AT+CGLA`
//! for APDUs on an open channel and `AT+CSIM` on the basic channel.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

use super::{from_hex, to_hex, CardChannel};
use crate::error::{BridgeError, Result};

/// Default bound on a single AT command round trip
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// USB modem command ports ignore the rate, but a tty still needs one
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

pub struct AtChannel<S> {
    port: Option<BufReader<S>>,
    command_timeout: Duration,
    /// Channel used for `AT+CGLA`; `None` routes APDUs through `AT+CSIM`
    channel: Option<u8>,
}

impl AtChannel<SerialStream> {
    /// Open the modem command port at `device`, e.g. `/dev/ttyUSB2`, as 8N1 raw
    pub fn open(device: &str) -> Result<Self> {
        Self::open_with_baud_rate(device, DEFAULT_BAUD_RATE)
    }

    pub fn open_with_baud_rate(device: &str, baud_rate: u32) -> Result<Self> {
        if device.is_empty() {
            return Err(BridgeError::Driver("at: device path required".to_string()));
        }

        let stream = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BridgeError::Driver(format!("at: failed to open {device}: {e}")))?;

        Ok(Self::new(stream))
    }
}

impl<S> AtChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            port: Some(BufReader::new(stream)),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            channel: None,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Send one command and collect the information lines preceding `OK`.
    async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        let timeout = self.command_timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| BridgeError::Driver("at: port closed".to_string()))?;

        trace!(command = cmd, "AT request");
        match tokio::time::timeout(timeout, exchange(port, cmd)).await {
            Ok(result) => result,
            Err(_) => {
                // drop whatever partial reply was buffered so the next
                // command starts on a clean line
                if let Some(port) = self.port.take() {
                    self.port = Some(BufReader::new(port.into_inner()));
                }
                warn!(command = cmd, "AT command timed out");
                Err(BridgeError::Driver(format!("at: timeout waiting for {cmd}")))
            }
        }
    }

    /// Run a command whose single information line starts with `prefix`
    async fn query(&mut self, cmd: &str, prefix: &str) -> Result<String> {
        let lines = self.command(cmd).await?;
        lines
            .into_iter()
            .find_map(|line| match line.strip_prefix(prefix) {
                Some(rest) => Some(rest.trim().to_string()),
                // some modems answer +CCHO with the bare session id
                None if prefix == "+CCHO:"
                    && !line.is_empty()
                    && line.chars().all(|c| c.is_ascii_digit()) =>
                {
                    Some(line)
                }
                None => None,
            })
            .ok_or_else(|| BridgeError::Driver(format!("at: no {prefix} line in response to {cmd}")))
    }
}

async fn exchange<S>(port: &mut BufReader<S>, cmd: &str) -> Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| BridgeError::Driver(format!("at: {e}"));

    port.write_all(cmd.as_bytes()).await.map_err(io_err)?;
    port.write_all(b"\r").await.map_err(io_err)?;
    port.flush().await.map_err(io_err)?;

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if port.read_line(&mut line).await.map_err(io_err)? == 0 {
            return Err(BridgeError::Driver("at: port closed".to_string()));
        }

        match line.trim() {
            "" => {}
            "OK" => return Ok(lines),
            "ERROR" => return Err(BridgeError::Driver(format!("at: {cmd} failed"))),
            l if l.starts_with("+CME ERROR") || l.starts_with("+CMS ERROR") => {
                return Err(BridgeError::Driver(format!("at: {cmd} failed: {l}")))
            }
            // command echo, left on by some modems until ATE0 lands
            l if l == cmd => {}
            l => lines.push(l.to_string()),
        }
    }
}

/// Parse `<len>,"<hex>"` as returned by `+CGLA` and `+CSIM`
fn parse_apdu_response(value: &str) -> Result<Vec<u8>> {
    let malformed = || BridgeError::Driver(format!("at: malformed APDU response '{value}'"));

    let (len, data) = value.split_once(',').ok_or_else(malformed)?;
    let len: usize = len.trim().parse().map_err(|_| malformed())?;
    let data = data.trim().trim_matches('"');
    if data.len() != len {
        return Err(malformed());
    }
    from_hex(data).ok_or_else(malformed)
}

#[async_trait]
impl<S> CardChannel for AtChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<()> {
        self.command("ATE0").await?;
        debug!("AT port ready");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.channel = None;
        if let Some(mut port) = self.port.take() {
            port.flush()
                .await
                .map_err(|e| BridgeError::Driver(format!("at: {e}")))?;
        }
        Ok(())
    }

    async fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        let hex = to_hex(apdu);
        let value = match self.channel {
            Some(channel) => {
                let cmd = format!("AT+CGLA={channel},{},\"{hex}\"", hex.len());
                self.query(&cmd, "+CGLA:").await?
            }
            None => {
                let cmd = format!("AT+CSIM={},\"{hex}\"", hex.len());
                self.query(&cmd, "+CSIM:").await?
            }
        };
        parse_apdu_response(&value)
    }

    async fn open_logical_channel(&mut self, aid: &[u8]) -> Result<u8> {
        let cmd = format!("AT+CCHO=\"{}\"", to_hex(aid));
        let value = self.query(&cmd, "+CCHO:").await?;
        let channel: u8 = value
            .parse()
            .map_err(|_| BridgeError::Driver(format!("at: invalid channel '{value}'")))?;
        self.channel = Some(channel);
        Ok(channel)
    }

    async fn close_logical_channel(&mut self, channel: u8) -> Result<()> {
        self.command(&format!("AT+CCHC={channel}")).await?;
        if self.channel == Some(channel) {
            self.channel = None;
        }
        Ok(())
    }
}

//! ECU driver: owns the serial transport, performs the protocol-specific
//! handshake, and exposes `poll_raw` + `parse` for one periodic read cycle.
//!
//! Dispatch on [`ProtocolMode`] lives in this one place (spec.md §9); the
//! sub-mode for plain connections is decided only during connect and never
//! re-entered.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{EcuConfig, ProtocolKind};
use crate::dataframe::DataFrame;
use crate::envelope::{self, wrap};
use crate::error::{CoreError, CoreResult};
use crate::parse::{self, ResponseTag};
use crate::serial::{drain, SerialTransport, TokioSerialTransport};

const CONNECT_SETTLE: Duration = Duration::from_millis(1000);
const DRAIN_SILENCE: Duration = Duration::from_millis(100);
const DRAIN_TOTAL_CAP: Duration = Duration::from_millis(1500);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

const CMD_ENHANCED: u8 = b'n';
const CMD_LEGACY: u8 = b'A';
const CMD_HANDSHAKE: u8 = b'Q';
const CMD_READ: u8 = b'r';

const ENHANCED_PAYLOAD_LEN: usize = 119;
const LEGACY_PAYLOAD_LEN: usize = 75;
const FRAMED_PAYLOAD_LEN: usize = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainSubMode {
    Enhanced,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Plain { sub: PlainSubMode },
    Framed,
}

/// Read-only connection state, observable by an embedder's status UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Untyped bytes plus a tag identifying which parser applies. Produced by
/// `poll_raw`, consumed once by `parse`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub tag: ResponseTag,
    pub bytes: Vec<u8>,
}

pub struct Driver {
    transport: Box<dyn SerialTransport>,
    protocol: ProtocolKind,
    mode: Option<ProtocolMode>,
    can_id: u8,
    stoich: f32,
    connected: bool,
}

impl Driver {
    /// Opens the tty and performs the protocol handshake (spec.md §4.3
    /// "Connect procedure"). Closes the port and returns an error on any
    /// handshake failure.
    pub async fn connect(config: &EcuConfig) -> CoreResult<Self> {
        let transport = TokioSerialTransport::open(&config.port_path, config.baud_rate).await?;
        Self::handshake_over(Box::new(transport), config.clone()).await
    }

    /// Runs the connect procedure (settle, drain, handshake) over an
    /// already-open transport. Used by `connect` for a real tty and by
    /// tests to drive a scripted transport through the same code path.
    /// Takes the config by value so the returned future is `'static` and
    /// can be handed straight to `tokio::spawn`.
    pub async fn handshake_over(
        mut transport: Box<dyn SerialTransport>,
        config: EcuConfig,
    ) -> CoreResult<Self> {
        tokio::time::sleep(CONNECT_SETTLE).await;
        transport.set_read_timeout(DRAIN_SILENCE);
        drain(transport.as_mut(), DRAIN_SILENCE, DRAIN_TOTAL_CAP).await;

        let mode = match config.protocol {
            ProtocolKind::Plain => match handshake_plain(transport.as_mut()).await {
                Ok(sub) => ProtocolMode::Plain { sub },
                Err(e) => {
                    transport.close();
                    return Err(e);
                }
            },
            ProtocolKind::Framed => match handshake_framed(transport.as_mut()).await {
                Ok(()) => ProtocolMode::Framed,
                Err(e) => {
                    transport.close();
                    return Err(e);
                }
            },
        };

        info!(?mode, path = %config.port_path, "ECU handshake succeeded");

        Ok(Self {
            transport,
            protocol: config.protocol,
            mode: Some(mode),
            can_id: config.can_id,
            stoich: config.stoich,
            connected: true,
        })
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Swaps the underlying transport without re-running the handshake.
    /// Exists for tests that want to script a fresh reply for each poll
    /// cycle against a driver whose mode was already pinned at connect.
    pub fn replace_transport_for_testing(&mut self, transport: Box<dyn SerialTransport>) {
        self.transport = transport;
    }

    /// One periodic read-parse cycle. Callers serialize access to the
    /// driver (spec.md: "The Driver has exactly one owner at a time").
    pub async fn poll(&mut self) -> CoreResult<DataFrame> {
        let raw = self.poll_raw().await?;
        Ok(self.parse(&raw))
    }

    /// Single periodic read cycle, dispatched on the mode decided at
    /// connect. Never holds any lock beyond this call's own scope.
    pub async fn poll_raw(&mut self) -> CoreResult<RawResponse> {
        let mode = self.mode.expect("poll_raw called before connect");
        let result = match mode {
            ProtocolMode::Plain {
                sub: PlainSubMode::Enhanced,
            } => poll_plain_enhanced(&mut *self.transport).await,
            ProtocolMode::Plain {
                sub: PlainSubMode::Legacy,
            } => poll_plain_legacy(&mut *self.transport).await,
            ProtocolMode::Framed => poll_framed(&mut *self.transport, self.can_id).await,
        };

        match &result {
            Ok(_) => self.connected = true,
            Err(e) => {
                warn!(error = %e, "ECU poll failed, marking disconnected");
                self.connected = false;
            }
        }

        result
    }

    /// Pure parse from a raw response into a normalized `DataFrame`.
    pub fn parse(&self, raw: &RawResponse) -> DataFrame {
        match raw.tag {
            ResponseTag::PlainN | ResponseTag::PlainA => parse::parse_plain(&raw.bytes, self.stoich),
            ResponseTag::Framed => parse::parse_framed(&raw.bytes, self.stoich),
        }
    }
}

async fn handshake_plain(transport: &mut dyn SerialTransport) -> CoreResult<PlainSubMode> {
    transport.reset_input_buffer();
    transport.write(&[CMD_ENHANCED]).await?;
    let reply = transport
        .read_up_to(3 + ENHANCED_PAYLOAD_LEN, Duration::from_secs(2))
        .await?;

    if contains_signature(&reply, &[0x6E, 0x32]) {
        debug!("plain enhanced handshake signature found");
        return Ok(PlainSubMode::Enhanced);
    }

    drain(transport, DRAIN_SILENCE, DRAIN_TOTAL_CAP).await;
    transport.reset_input_buffer();
    transport.write(&[CMD_LEGACY]).await?;
    let reply = transport
        .read_up_to(1 + LEGACY_PAYLOAD_LEN + 8, Duration::from_secs(2))
        .await?;

    if reply.first() == Some(&CMD_LEGACY) {
        debug!("plain legacy handshake echo found");
        return Ok(PlainSubMode::Legacy);
    }

    Err(CoreError::HandshakeFailed {
        path: String::new(),
    })
}

fn contains_signature(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

async fn handshake_framed(transport: &mut dyn SerialTransport) -> CoreResult<()> {
    transport.reset_input_buffer();
    transport.write(&wrap(&[CMD_HANDSHAKE])).await?;
    envelope::read_frame(transport, Duration::from_secs(2)).await?;
    Ok(())
}

async fn poll_plain_enhanced(transport: &mut dyn SerialTransport) -> CoreResult<RawResponse> {
    transport.reset_input_buffer();
    transport.write(&[CMD_ENHANCED]).await?;

    let header = transport.read_exact(3, READ_TIMEOUT).await?;
    if header[0] != 0x6E || header[1] != 0x32 {
        return Err(CoreError::HeaderMismatch);
    }

    let len = header[2] as usize;
    if len == 0 || len > 255 {
        return Err(CoreError::PayloadSizeUnexpected(len));
    }

    let payload = transport.read_exact(len, READ_TIMEOUT).await?;
    Ok(RawResponse {
        tag: ResponseTag::PlainN,
        bytes: payload,
    })
}

async fn poll_plain_legacy(transport: &mut dyn SerialTransport) -> CoreResult<RawResponse> {
    transport.reset_input_buffer();
    transport.write(&[CMD_LEGACY]).await?;

    let bytes = transport
        .read_exact(1 + LEGACY_PAYLOAD_LEN, READ_TIMEOUT)
        .await?;
    if bytes[0] != CMD_LEGACY {
        return Err(CoreError::HeaderMismatch);
    }

    Ok(RawResponse {
        tag: ResponseTag::PlainA,
        bytes: bytes[1..].to_vec(),
    })
}

async fn poll_framed(transport: &mut dyn SerialTransport, can_id: u8) -> CoreResult<RawResponse> {
    transport.reset_input_buffer();
    let length = FRAMED_PAYLOAD_LEN as u16;
    let request = [
        CMD_READ,
        can_id,
        0x30,
        0x00,
        0x00,
        (length & 0xFF) as u8,
        (length >> 8) as u8,
    ];
    transport.write(&wrap(&request)).await?;

    let payload = envelope::read_frame(transport, READ_TIMEOUT).await?;

    let trimmed = match payload.len() {
        FRAMED_PAYLOAD_LEN => payload,
        n if n == FRAMED_PAYLOAD_LEN + 1 => payload[1..].to_vec(),
        n if n > FRAMED_PAYLOAD_LEN => payload[n - FRAMED_PAYLOAD_LEN..].to_vec(),
        n => return Err(CoreError::PayloadSizeUnexpected(n)),
    };

    Ok(RawResponse {
        tag: ResponseTag::Framed,
        bytes: trimmed,
    })
}

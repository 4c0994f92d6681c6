//! Wire format of the remote console (RCON) administration protocol.
//!
//! Every packet on the wire is laid out as (all integers little-endian):
//!
//! ```text
//! [size:i32][request_id:i32][type:i32][body:bytes][0x00][0x00]
//! ```
//!
//! `size` counts everything after itself. The codec is pure: [`encode`] and
//! [`decode`] never touch a socket, and [`read_packet`] / [`write_packet`]
//! work over any tokio reader or writer.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length of the size prefix
pub const SIZE_FIELD_LEN: usize = 4;
/// Length of the request id and type fields that follow the size prefix
pub const HEADER_LEN: usize = 8;
/// Two mandatory null bytes closing every packet
pub const TERMINATOR_LEN: usize = 2;
/// Smallest legal `size` value: a header and a terminator with an empty body
pub const MIN_PACKET_SIZE: i32 = (HEADER_LEN + TERMINATOR_LEN) as i32;
/// Largest `size` we are willing to send
pub const MAX_OUTBOUND_SIZE: i32 = 4096;
/// Largest `size` we are willing to allocate for when receiving
pub const MAX_INBOUND_SIZE: i32 = 65536;
/// Largest body [`encode`] accepts
pub const MAX_BODY_LEN: usize = MAX_OUTBOUND_SIZE as usize - HEADER_LEN - TERMINATOR_LEN;
/// Request id a server answers with when it rejects the password
pub const AUTH_FAILED_ID: i32 = -1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet body of {len} bytes exceeds the {max} byte limit")]
    BodyTooLarge { len: usize, max: usize },
    #[error("invalid packet size {0}")]
    InvalidSize(i32),
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("packet is missing its null terminator")]
    MissingTerminator,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("request ids exhausted")]
    RequestIdsExhausted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Packet type code.
///
/// Kept as a raw code rather than an enum because the protocol reuses `2`
/// for both `EXEC_COMMAND` and `AUTH_RESPONSE`; which one a packet means
/// depends on the exchange in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub i32);

impl PacketType {
    pub const AUTH: Self = Self(3);
    pub const EXEC_COMMAND: Self = Self(2);
    pub const AUTH_RESPONSE: Self = Self(2);
    pub const RESPONSE_VALUE: Self = Self(0);

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            3 => f.write_str("AUTH"),
            2 => f.write_str("EXEC_COMMAND/AUTH_RESPONSE"),
            0 => f.write_str("RESPONSE_VALUE"),
            other => write!(f, "UNKNOWN({})", other),
        }
    }
}

/// A single RCON packet. `body` holds the payload only; the size prefix and
/// the trailing null bytes are framing and never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: PacketType,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(request_id: i32, kind: PacketType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            kind,
            body: body.into(),
        }
    }

    /// Body decoded as text, replacing invalid UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// True when this packet is the server's answer to a rejected password
    pub fn is_auth_failure(&self) -> bool {
        self.request_id == AUTH_FAILED_ID
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.request_id, self.kind, &self.body)
    }
}

/// Serializes one packet, size prefix and terminator included.
pub fn encode(request_id: i32, kind: PacketType, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if body.len() > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge {
            len: body.len(),
            max: MAX_BODY_LEN,
        });
    }

    let size = HEADER_LEN + body.len() + TERMINATOR_LEN;
    let mut buf = Vec::with_capacity(SIZE_FIELD_LEN + size);
    buf.extend_from_slice(&(size as i32).to_le_bytes());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&kind.code().to_le_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(&[0, 0]);
    Ok(buf)
}

/// Decodes one packet from a complete buffer (size prefix included).
///
/// A buffer holding fewer bytes than its size prefix declares is a
/// [`ProtocolError::ShortRead`]; trailing bytes past the packet are ignored.
pub fn decode(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    if bytes.len() < SIZE_FIELD_LEN {
        return Err(ProtocolError::ShortRead {
            expected: SIZE_FIELD_LEN,
            received: bytes.len(),
        });
    }

    let size = validate_size(le_i32(bytes, 0))?;
    let available = bytes.len() - SIZE_FIELD_LEN;
    if available < size {
        return Err(ProtocolError::ShortRead {
            expected: size,
            received: available,
        });
    }

    decode_frame(&bytes[SIZE_FIELD_LEN..SIZE_FIELD_LEN + size])
}

/// Reads exactly one packet from `reader`.
///
/// Stream reads may return fewer bytes than requested, so both the size
/// prefix and the frame are read in a loop until complete. End of stream
/// before that point is a [`ProtocolError::ShortRead`].
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; SIZE_FIELD_LEN];
    read_full(reader, &mut size_buf).await?;
    let size = validate_size(i32::from_le_bytes(size_buf))?;

    let mut frame = vec![0u8; size];
    read_full(reader, &mut frame).await?;
    decode_frame(&frame)
}

/// Encodes and writes one packet, flushing the writer.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

fn validate_size(size: i32) -> Result<usize, ProtocolError> {
    if !(MIN_PACKET_SIZE..=MAX_INBOUND_SIZE).contains(&size) {
        return Err(ProtocolError::InvalidSize(size));
    }
    Ok(size as usize)
}

// `frame` is everything after the size prefix, already length-checked.
fn decode_frame(frame: &[u8]) -> Result<Packet, ProtocolError> {
    let body_end = frame.len() - TERMINATOR_LEN;
    if frame[body_end..] != [0, 0] {
        return Err(ProtocolError::MissingTerminator);
    }

    Ok(Packet {
        request_id: le_i32(frame, 0),
        kind: PacketType(le_i32(frame, 4)),
        body: frame[HEADER_LEN..body_end].to_vec(),
    })
}

fn le_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(word)
}

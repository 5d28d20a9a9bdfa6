//! Framing and encoding for the messages exchanged between client and server.
//!
//! Wire format, identical in both directions:
//! ```text
//! [len:4][version:1][body:len-1]
//! ```
//! `len` is big-endian and counts the version byte plus the body. The body is
//! a bincode-encoded [`Message`]. TCP gives no message boundaries, so readers
//! always pull the full header and then exactly `len` bytes before decoding.

use crate::{InputState, Snapshot, MAX_NAME_LEN};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 4;
/// Upper bound on `len`; anything larger is treated as corrupt or hostile.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

// Worst-case varint sizes: u32 takes up to 5 bytes, a u64 length prefix up to 9.
const MAX_SNAPSHOT_ENTRY_LEN: usize = 5 + 5 + 4 + 4 + 9 + MAX_NAME_LEN;
const SNAPSHOT_OVERHEAD: usize = 1 + 5 + 9;

/// Most players a snapshot can carry and still fit in one frame.
pub const MAX_SNAPSHOT_PLAYERS: usize =
    (MAX_FRAME_LEN - SNAPSHOT_OVERHEAD) / MAX_SNAPSHOT_ENTRY_LEN;

/// Everything that can travel inside a frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    /// Client to server: one tick of input.
    Input(InputState),
    /// Server to client: the full player registry.
    Snapshot(Snapshot),
}

/// The frame itself is malformed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("empty frame")]
    EmptyFrame,

    #[error("stream ended mid-frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("malformed body: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Failure to move a frame across a connection.
#[derive(Debug, Error)]
pub enum WireError {
    /// Clean EOF on a frame boundary.
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("connection reset by peer: {0}")]
    PeerReset(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[source] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => WireError::PeerReset(err),
            _ => WireError::Io(err),
        }
    }
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Input(_) => "input",
            Message::Snapshot(_) => "snapshot",
        }
    }

    pub fn into_input(self) -> Result<InputState, ProtocolError> {
        match self {
            Message::Input(input) => Ok(input),
            other => Err(ProtocolError::UnexpectedMessage(other.kind())),
        }
    }

    pub fn into_snapshot(self) -> Result<Snapshot, ProtocolError> {
        match self {
            Message::Snapshot(snapshot) => Ok(snapshot),
            other => Err(ProtocolError::UnexpectedMessage(other.kind())),
        }
    }
}

fn body_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_LEN as u64)
}

/// Encodes `msg` into one complete frame, header included.
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = body_options().serialize(msg)?;
    let len = body.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validates a length header and returns the number of bytes that follow it.
pub fn frame_len(header: [u8; HEADER_SIZE]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

/// Decodes the part of a frame that follows the length header.
pub fn decode_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    let (&version, body) = payload.split_first().ok_or(ProtocolError::EmptyFrame)?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(body_options().deserialize(body)?)
}

fn check_filled(expected: usize, received: usize) -> Result<(), WireError> {
    if received < expected {
        return Err(ProtocolError::Truncated { expected, received }.into());
    }
    Ok(())
}

// A single read() may return any prefix of what the peer sent, so keep going
// until the buffer is full or the stream ends.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn read_full_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Blocks until one whole frame has been read from `reader` and decodes it.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_SIZE];
    let received = read_full(reader, &mut header)?;
    if received == 0 {
        return Err(WireError::PeerClosed);
    }
    check_filled(HEADER_SIZE, received)?;

    let len = frame_len(header)?;
    let mut payload = vec![0u8; len];
    let received = read_full(reader, &mut payload)?;
    check_filled(len, received)?;

    Ok(decode_payload(&payload)?)
}

pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), WireError> {
    let frame = encode(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Async counterpart of [`read_message`].
pub async fn read_message_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_SIZE];
    let received = read_full_async(reader, &mut header).await?;
    if received == 0 {
        return Err(WireError::PeerClosed);
    }
    check_filled(HEADER_SIZE, received)?;

    let len = frame_len(header)?;
    let mut payload = vec![0u8; len];
    let received = read_full_async(reader, &mut payload).await?;
    check_filled(len, received)?;

    Ok(decode_payload(&payload)?)
}

pub async fn write_message_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), WireError> {
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

//! Envelope codec shared by `glsd` and `gls`.
//!
//! Wire format, version 1. Every envelope travels as a single frame:
//!
//! ```text
//! +-------+---------+------+-------------+-------------------------------+
//! | "GL"  | version | kind | length (BE) | payload                       |
//! | 2     | 1       | 1    | 4           | length bytes                  |
//! +-------+---------+------+-------------+-------------------------------+
//! ```
//!
//! The payload is a MessagePack header immediately followed by a MessagePack
//! body. Calls carry `{method, seq}` and the argument as body. Results carry
//! `{method, seq, error}` and the return value as body, or nil when `error`
//! is set. Structs are encoded as maps so the payload is self-describing.

use std::io::{self, Cursor};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: [u8; 2] = *b"GL";
pub const VERSION: u8 = 1;
pub const PREAMBLE_LEN: usize = 8;
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Call = 0x01,
    Reply = 0x02,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(FrameKind::Call),
            0x02 => Some(FrameKind::Reply),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("expected {expected:?} frame, got kind byte {got:#04x}")]
    UnexpectedKind { expected: FrameKind, got: u8 },
    #[error("frame payload of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHeader {
    pub method: String,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyHeader {
    pub method: String,
    pub seq: u64,
    pub error: Option<String>,
}

/// A decoded call whose argument is still encoded; the procedure it is
/// dispatched to decides the argument type.
#[derive(Debug, Clone)]
pub struct Call {
    pub header: CallHeader,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub header: ReplyHeader,
    pub body: Vec<u8>,
}

pub fn encode_body<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(body)?)
}

pub async fn write_call<W, A>(writer: &mut W, header: &CallHeader, arg: &A) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    A: Serialize + ?Sized,
{
    let body = encode_body(arg)?;
    write_frame(writer, FrameKind::Call, header, &body).await
}

pub async fn read_call<R>(reader: &mut R) -> Result<Option<Call>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let Some(payload) = read_frame(reader, FrameKind::Call).await? else {
        return Ok(None);
    };
    let (header, body) = split_payload(&payload)?;
    Ok(Some(Call { header, body }))
}

/// Writes a result frame. `body` must already be encoded; pass the encoding
/// of `()` when `header.error` is set.
pub async fn write_reply<W>(writer: &mut W, header: &ReplyHeader, body: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, FrameKind::Reply, header, body).await
}

pub async fn read_reply<R>(reader: &mut R) -> Result<Option<Reply>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let Some(payload) = read_frame(reader, FrameKind::Reply).await? else {
        return Ok(None);
    };
    let (header, body) = split_payload(&payload)?;
    Ok(Some(Reply { header, body }))
}

async fn write_frame<W, H>(writer: &mut W, kind: FrameKind, header: &H, body: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    H: Serialize,
{
    let header = rmp_serde::to_vec_named(header)?;
    let len = header.len() + body.len();
    if len > MAX_PAYLOAD {
        return Err(CodecError::TooLarge(len));
    }

    let mut frame = Vec::with_capacity(PREAMBLE_LEN + len);
    frame.extend_from_slice(&MAGIC);
    frame.push(VERSION);
    frame.push(kind as u8);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame of the expected kind. Returns `None` when the stream ends
/// cleanly before the first byte of a frame.
async fn read_frame<R>(reader: &mut R, expected: FrameKind) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut preamble = [0u8; PREAMBLE_LEN];
    if reader.read(&mut preamble[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut preamble[1..]).await?;

    let magic = [preamble[0], preamble[1]];
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    if preamble[2] != VERSION {
        return Err(CodecError::UnsupportedVersion(preamble[2]));
    }
    match FrameKind::from_byte(preamble[3]) {
        Some(kind) if kind == expected => {}
        _ => {
            return Err(CodecError::UnexpectedKind {
                expected,
                got: preamble[3],
            })
        }
    }

    let len = u32::from_be_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(CodecError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

fn split_payload<H: DeserializeOwned>(payload: &[u8]) -> Result<(H, Vec<u8>), CodecError> {
    let mut cursor = Cursor::new(payload);
    let header: H = rmp_serde::from_read(&mut cursor)?;
    let offset = cursor.position() as usize;
    Ok((header, payload[offset..].to_vec()))
}

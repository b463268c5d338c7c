//! DCA wire format
//!
//! A stream is an optional prologue followed by frames:
//! - prologue: `"DCA" + version digit`, `i32` LE length, UTF-8 JSON metadata
//! - frame: `i16` LE length, then that many bytes of Opus packet
//!
//! The same layout is used for pipes, files and sockets. Decoding has a
//! blocking (`std::io::Read`) and an async (`tokio::io::AsyncRead`) flavour;
//! both distinguish a clean end of stream at a frame boundary from a
//! truncated frame.

pub mod decoder;
pub mod metadata;

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{DcaError, Result};
use metadata::Metadata;

/// Current version of the DCA format
pub const FORMAT_VERSION: i8 = 1;

/// Version of this library, recorded in the metadata
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic tag that opens a prologue
pub const MAGIC: [u8; 4] = [b'D', b'C', b'A', b'0' + FORMAT_VERSION as u8];

/// Largest payload a frame can carry
pub const MAX_FRAME_LEN: usize = i16::MAX as usize;

/// A decoded prologue
#[derive(Debug, Clone, PartialEq)]
pub struct Prologue {
    pub version: i32,
    pub metadata: Metadata,
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(DcaError::FrameLength(payload.len() as i64));
    }
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_i16_le(payload.len() as i16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read one frame and return its payload.
pub fn decode_frame<R: Read>(r: &mut R) -> Result<Bytes> {
    let mut header = [0u8; 2];
    let len = frame_len(header_read(read_full(r, &mut header)?, &header)?)?;
    let mut payload = vec![0u8; len];
    let read = read_full(r, &mut payload)?;
    if read < len {
        return Err(DcaError::ShortRead {
            expected: len,
            read,
        });
    }
    Ok(Bytes::from(payload))
}

/// Async flavour of [`decode_frame`].
pub async fn decode_frame_async<R: AsyncRead + Unpin>(r: &mut R) -> Result<Bytes> {
    let mut header = [0u8; 2];
    let read = read_full_async(r, &mut header).await?;
    let len = frame_len(header_read(read, &header)?)?;
    let mut payload = vec![0u8; len];
    let read = read_full_async(r, &mut payload).await?;
    if read < len {
        return Err(DcaError::ShortRead {
            expected: len,
            read,
        });
    }
    Ok(Bytes::from(payload))
}

/// Serialize the metadata prologue.
pub fn encode_prologue(metadata: &Metadata) -> Result<Bytes> {
    let json = serde_json::to_vec(metadata)
        .map_err(|e| DcaError::Format(format!("cannot serialize metadata: {}", e)))?;
    let len = i32::try_from(json.len()).map_err(|_| DcaError::FrameLength(json.len() as i64))?;

    let mut buf = BytesMut::with_capacity(MAGIC.len() + 4 + json.len());
    buf.put_slice(&MAGIC);
    buf.put_i32_le(len);
    buf.put_slice(&json);
    Ok(buf.freeze())
}

/// Read and parse the metadata prologue.
pub fn decode_prologue<R: Read>(r: &mut R) -> Result<Prologue> {
    let mut fingerprint = [0u8; 4];
    let read = read_full(r, &mut fingerprint)?;
    let version = parse_fingerprint(&fingerprint, read)?;

    let mut len = [0u8; 4];
    let read = read_full(r, &mut len)?;
    let len = metadata_len(&len, read)?;

    let mut body = Vec::new();
    (&mut *r).take(len as u64).read_to_end(&mut body)?;
    parse_body(version, &body, len)
}

/// Async flavour of [`decode_prologue`].
pub async fn decode_prologue_async<R: AsyncRead + Unpin>(r: &mut R) -> Result<Prologue> {
    let mut fingerprint = [0u8; 4];
    let read = read_full_async(r, &mut fingerprint).await?;
    let version = parse_fingerprint(&fingerprint, read)?;

    let mut len = [0u8; 4];
    let read = read_full_async(r, &mut len).await?;
    let len = metadata_len(&len, read)?;

    let mut body = Vec::new();
    (&mut *r).take(len as u64).read_to_end(&mut body).await?;
    parse_body(version, &body, len)
}

fn header_read(read: usize, header: &[u8; 2]) -> Result<[u8; 2]> {
    match read {
        0 => Err(DcaError::EndOfStream),
        1 => Err(DcaError::ShortRead {
            expected: 2,
            read: 1,
        }),
        _ => Ok(*header),
    }
}

fn frame_len(header: [u8; 2]) -> Result<usize> {
    let len = i16::from_le_bytes(header);
    if len < 0 {
        return Err(DcaError::FrameLength(len as i64));
    }
    Ok(len as usize)
}

fn parse_fingerprint(fingerprint: &[u8; 4], read: usize) -> Result<i32> {
    if read == 0 {
        return Err(DcaError::EndOfStream);
    }
    let checked = read.min(3);
    if fingerprint[..checked] != MAGIC[..checked] {
        return Err(DcaError::NotDca);
    }
    if read < fingerprint.len() {
        return Err(DcaError::ShortRead {
            expected: fingerprint.len(),
            read,
        });
    }

    let suffix = fingerprint[3];
    (suffix as char)
        .to_digit(10)
        .map(|v| v as i32)
        .ok_or_else(|| DcaError::Format(format!("invalid format version {:?}", suffix as char)))
}

fn metadata_len(len: &[u8; 4], read: usize) -> Result<usize> {
    if read < len.len() {
        return Err(DcaError::ShortRead {
            expected: len.len(),
            read,
        });
    }
    let len = i32::from_le_bytes(*len);
    if len < 0 {
        return Err(DcaError::Format(format!("negative metadata length {}", len)));
    }
    Ok(len as usize)
}

fn parse_body(version: i32, body: &[u8], expected: usize) -> Result<Prologue> {
    if body.len() < expected {
        return Err(DcaError::ShortRead {
            expected,
            read: body.len(),
        });
    }
    let metadata = serde_json::from_slice(body)
        .map_err(|e| DcaError::Format(format!("invalid metadata json: {}", e)))?;
    Ok(Prologue { version, metadata })
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

pub(crate) async fn read_full_async<R>(r: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]).await {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

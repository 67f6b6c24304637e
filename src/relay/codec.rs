// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U32},
};

/// Length of the inbound frame header: 4-byte big-endian payload length
/// plus 1 session byte.
pub const FRAME_HEADER_LEN: usize = 5;

/// Inbound frame header, as laid out on the wire.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct FrameHeader {
    pub payload_len: U32<BigEndian>,
    pub session_id: u8,
}

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub session_id: u8,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended mid-header or mid-payload. Relay handlers treat
    /// this as a normal disconnect.
    #[error("stream closed mid-frame")]
    BadFrame,
    #[error("frame I/O failed: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::BadFrame
        } else {
            FrameError::Io(e)
        }
    }
}

/// Reads the 5-byte frame header.
pub async fn read_header<R>(reader: &mut R) -> Result<FrameHeader, FrameError>
where R: AsyncRead + Unpin {
    let mut buf = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut buf).await?;
    FrameHeader::read_from_bytes(&buf).map_err(|_| FrameError::BadFrame)
}

/// Reads exactly `len` payload bytes.
pub async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Bytes, FrameError>
where R: AsyncRead + Unpin {
    let mut buf = BytesMut::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

/// Reads a whole inbound frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where R: AsyncRead + Unpin {
    let header = read_header(reader).await?;
    let payload = read_payload(reader, header.payload_len.get() as usize).await?;
    Ok(Frame { session_id: header.session_id, payload })
}

/// Writes an outbound (server→client) frame: 4-byte big-endian length,
/// then the payload. No session byte on this side.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where W: AsyncWrite + Unpin {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

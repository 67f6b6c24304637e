// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use nfcgate_relay_rs::relay::codec::{
    FRAME_HEADER_LEN, FrameError, read_frame, read_header, write_frame,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_read_frame_roundtrip() -> Result<()> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&4u32.to_be_bytes());
    wire.push(7);
    wire.extend_from_slice(&hex!("DEADBEEF"));

    let mut reader = wire.as_slice();
    let frame = read_frame(&mut reader).await?;
    assert_eq!(frame.session_id, 7);
    assert_eq!(frame.payload.as_ref(), hex!("DEADBEEF"));
    Ok(())
}

#[tokio::test]
async fn test_zero_length_frame() -> Result<()> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&0u32.to_be_bytes());
    wire.push(0);

    let mut reader = wire.as_slice();
    let frame = read_frame(&mut reader).await?;
    assert_eq!(frame.session_id, 0);
    assert!(frame.payload.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_header_layout_is_big_endian() -> Result<()> {
    let wire = hex!("00 00 01 02 2A");
    assert_eq!(wire.len(), FRAME_HEADER_LEN);

    let mut reader = wire.as_slice();
    let header = read_header(&mut reader).await?;
    assert_eq!(header.payload_len.get(), 0x0102);
    assert_eq!(header.session_id, 0x2A);
    Ok(())
}

#[tokio::test]
async fn test_truncated_header_is_bad_frame() {
    let wire = hex!("00 00 00");
    let mut reader = wire.as_slice();
    match read_header(&mut reader).await {
        Err(FrameError::BadFrame) => {},
        other => panic!("expected BadFrame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_truncated_payload_is_bad_frame() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&10u32.to_be_bytes());
    wire.push(1);
    wire.extend_from_slice(b"short");

    let mut reader = wire.as_slice();
    match read_frame(&mut reader).await {
        Err(FrameError::BadFrame) => {},
        other => panic!("expected BadFrame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_immediate_eof_is_bad_frame() {
    let mut reader: &[u8] = &[];
    match read_header(&mut reader).await {
        Err(FrameError::BadFrame) => {},
        other => panic!("expected BadFrame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_write_frame_has_no_session_byte() -> Result<()> {
    let (mut a, mut b) = tokio::io::duplex(64);
    write_frame(&mut a, &hex!("DEADBEEF")).await?;
    a.shutdown().await?;

    let mut out = Vec::new();
    b.read_to_end(&mut out).await?;
    assert_eq!(out[..4], 4u32.to_be_bytes());
    assert_eq!(&out[4..], hex!("DEADBEEF"));
    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use hex_literal::hex;
use nfcgate_relay_rs::cfg::enums::RedactMode;
use tokio::net::TcpStream;

use super::common::{
    eventually_async, expect_silence, recv_frame, send_frame, start_relay,
};

#[tokio::test]
async fn test_fanout_reaches_every_other_member_exactly_once() {
    let relay = start_relay(RedactMode::Full).await;

    let mut a = TcpStream::connect(relay.addr).await.expect("connect a");
    let mut b = TcpStream::connect(relay.addr).await.expect("connect b");
    let mut c = TcpStream::connect(relay.addr).await.expect("connect c");

    // Join one at a time; join frames relay to the members already there.
    send_frame(&mut a, 7, b"JA").await;
    let registry = &relay.registry;
    eventually_async(|| async { registry.session_size(7).await == 1 }, "a joined").await;

    send_frame(&mut b, 7, b"JB").await;
    eventually_async(|| async { registry.session_size(7).await == 2 }, "b joined").await;
    assert_eq!(recv_frame(&mut a).await, b"JB");

    send_frame(&mut c, 7, b"JC").await;
    eventually_async(|| async { registry.session_size(7).await == 3 }, "c joined").await;
    assert_eq!(recv_frame(&mut a).await, b"JC");
    assert_eq!(recv_frame(&mut b).await, b"JC");

    // The scenario payload: everyone but the origin sees it, once.
    send_frame(&mut a, 7, &hex!("DEADBEEF")).await;
    assert_eq!(recv_frame(&mut b).await, hex!("DEADBEEF"));
    assert_eq!(recv_frame(&mut c).await, hex!("DEADBEEF"));

    expect_silence(&mut a).await;
    expect_silence(&mut b).await;
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn test_single_origin_ordering_is_preserved() {
    let relay = start_relay(RedactMode::Full).await;

    let mut a = TcpStream::connect(relay.addr).await.expect("connect a");
    let mut b = TcpStream::connect(relay.addr).await.expect("connect b");

    send_frame(&mut a, 2, b"JA").await;
    send_frame(&mut b, 2, b"JB").await;
    let registry = &relay.registry;
    eventually_async(|| async { registry.session_size(2).await == 2 }, "both joined").await;
    assert_eq!(recv_frame(&mut a).await, b"JB");

    for i in 0..10u8 {
        send_frame(&mut a, 2, &[b'p', i]).await;
    }
    for i in 0..10u8 {
        assert_eq!(recv_frame(&mut b).await, [b'p', i]);
    }
}

#[tokio::test]
async fn test_members_of_other_sessions_see_nothing() {
    let relay = start_relay(RedactMode::Full).await;

    let mut a = TcpStream::connect(relay.addr).await.expect("connect a");
    let mut b = TcpStream::connect(relay.addr).await.expect("connect b");

    send_frame(&mut a, 1, b"JA").await;
    send_frame(&mut b, 2, b"JB").await;
    let registry = &relay.registry;
    eventually_async(|| async { registry.session_size(2).await == 1 }, "b joined").await;

    send_frame(&mut a, 1, b"only for session one").await;
    expect_silence(&mut b).await;
}

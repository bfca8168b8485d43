// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, time::Duration};

use p0p::{
    client::{event::EventClient, machine::ClientState},
    wire::{self, Command, MAX_DATAGRAM},
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_millis(20);

struct Peer {
    socket: UdpSocket,
    addr: SocketAddr,
}

async fn make_client(timeout: Option<Duration>) -> (EventClient, Peer, CancellationToken) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
    let addr = socket.local_addr().expect("peer addr");
    let cancel = CancellationToken::new();
    let client = EventClient::connect(addr, timeout, cancel.clone())
        .await
        .expect("client");
    (client, Peer { socket, addr }, cancel)
}

async fn ready_client(timeout: Option<Duration>) -> (EventClient, Peer, CancellationToken) {
    let (mut client, peer, cancel) = make_client(timeout).await;
    client.send_hello().await;
    client
        .handle_packet(
            &wire::encode(Command::Hello, 0, client.session_id(), None),
            peer.addr,
        )
        .await;
    assert_eq!(client.state(), ClientState::Ready);
    (client, peer, cancel)
}

impl Peer {
    async fn recv_command(&self) -> (Command, u32, u32) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = self.socket.recv_from(&mut buf).await.expect("datagram");
        let (header, _) = wire::decode(&buf[..len]).expect("valid datagram");
        (
            header.command().expect("known command"),
            header.seq.get(),
            header.session_id.get(),
        )
    }
}

#[tokio::test]
async fn hello_arms_the_oneshot_deadline() {
    let (mut client, peer, _cancel) = make_client(Some(INTERVAL)).await;

    client.send_hello().await;
    assert!(client.timer_armed());
    assert_eq!(client.seq(), 1);

    let (command, seq, sid) = peer.recv_command().await;
    assert_eq!(command, Command::Hello);
    assert_eq!(seq, 0);
    assert_eq!(sid, client.session_id());
}

#[tokio::test]
async fn hello_reply_disarms_the_timer() {
    let (mut client, peer, _cancel) = make_client(Some(INTERVAL)).await;
    client.send_hello().await;

    client
        .handle_packet(
            &wire::encode(Command::Hello, 0, client.session_id(), None),
            peer.addr,
        )
        .await;

    assert_eq!(client.state(), ClientState::Ready);
    assert!(!client.timer_armed());
    assert_eq!(client.seq(), 1);
}

#[tokio::test]
async fn disabled_interval_never_arms() {
    let (mut client, peer, _cancel) = make_client(None).await;

    client.send_hello().await;
    assert!(!client.timer_armed());

    client
        .handle_packet(
            &wire::encode(Command::Hello, 0, client.session_id(), None),
            peer.addr,
        )
        .await;
    client.send_data("a").await;
    assert!(!client.timer_armed());
}

#[tokio::test]
async fn non_hello_reply_tears_the_session_down() {
    let (mut client, peer, cancel) = make_client(Some(INTERVAL)).await;
    client.send_hello().await;

    client
        .handle_packet(
            &wire::encode(Command::Data, 0, client.session_id(), Some("?")),
            peer.addr,
        )
        .await;

    assert_eq!(client.state(), ClientState::Closed);
    assert!(cancel.is_cancelled());
    assert_eq!(client.seq(), 2);

    let _hello = peer.recv_command().await;
    let (command, seq, _) = peer.recv_command().await;
    assert_eq!(command, Command::Goodbye);
    assert_eq!(seq, 1);
}

#[tokio::test]
async fn foreign_session_id_tears_the_session_down() {
    let (mut client, peer, cancel) = make_client(Some(INTERVAL)).await;
    client.send_hello().await;

    client
        .handle_packet(
            &wire::encode(Command::Hello, 0, client.session_id().wrapping_add(7), None),
            peer.addr,
        )
        .await;

    assert_eq!(client.seq(), 2);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn reply_from_wrong_address_is_ignored() {
    let (mut client, peer, _cancel) = make_client(Some(INTERVAL)).await;
    client.send_hello().await;

    let elsewhere: SocketAddr = "127.0.0.1:1".parse().expect("addr");
    client
        .handle_packet(
            &wire::encode(Command::Hello, 0, client.session_id(), None),
            elsewhere,
        )
        .await;

    assert_eq!(client.state(), ClientState::WaitingForHello);
    assert_eq!(client.seq(), 1);
}

#[tokio::test]
async fn send_data_arms_only_a_stopped_timer() {
    let (mut client, _peer, _cancel) = ready_client(Some(INTERVAL)).await;

    client.send_data("a").await;
    let first_deadline = client.deadline();
    assert!(first_deadline.is_some());

    client.send_data("b").await;
    assert_eq!(client.deadline(), first_deadline);
    assert_eq!(client.seq(), 3);
}

#[tokio::test]
async fn alive_clears_the_timer_when_ready() {
    let (mut client, peer, _cancel) = ready_client(Some(INTERVAL)).await;

    client.send_data("a").await;
    client
        .handle_packet(
            &wire::encode(Command::Alive, 1, client.session_id(), None),
            peer.addr,
        )
        .await;

    assert!(!client.timer_armed());
    assert_eq!(client.state(), ClientState::Ready);
}

#[tokio::test]
async fn alive_leaves_the_goodbye_deadline_standing() {
    let (mut client, peer, _cancel) = ready_client(Some(INTERVAL)).await;

    client.send_goodbye().await;
    assert_eq!(client.state(), ClientState::Closing);
    assert!(client.timer_armed());

    client
        .handle_packet(
            &wire::encode(Command::Alive, 1, client.session_id(), None),
            peer.addr,
        )
        .await;

    assert!(client.timer_armed());
}

#[tokio::test]
async fn goodbye_from_server_closes_without_a_reply() {
    let (mut client, peer, cancel) = ready_client(Some(INTERVAL)).await;

    client
        .handle_packet(
            &wire::encode(Command::Goodbye, 1, client.session_id(), None),
            peer.addr,
        )
        .await;

    assert_eq!(client.state(), ClientState::Closed);
    assert!(cancel.is_cancelled());
    assert_eq!(client.seq(), 1);
}

#[tokio::test]
async fn two_timeouts_close_the_session() {
    let (mut client, _peer, cancel) = ready_client(Some(INTERVAL)).await;
    client.send_data("a").await;

    client.on_timeout().await;
    assert_eq!(client.state(), ClientState::Closing);
    assert!(client.timer_armed());
    assert!(!cancel.is_cancelled());

    client.on_timeout().await;
    assert_eq!(client.state(), ClientState::Closed);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn sends_are_refused_while_closing() {
    let (mut client, _peer, _cancel) = ready_client(Some(INTERVAL)).await;

    client.send_goodbye().await;
    let seq = client.seq();

    client.send_data("ignored").await;
    client.send_goodbye().await;
    assert_eq!(client.seq(), seq);
}

#[tokio::test]
async fn send_data_is_refused_during_the_handshake() {
    let (mut client, _peer, _cancel) = make_client(Some(INTERVAL)).await;
    client.send_hello().await;

    client.send_data("too early").await;
    assert_eq!(client.seq(), 1);
}

#[tokio::test]
async fn closed_client_is_inert() {
    let (mut client, peer, _cancel) = ready_client(Some(INTERVAL)).await;
    client.close();
    let seq = client.seq();

    client.send_data("ignored").await;
    client
        .handle_packet(
            &wire::encode(Command::Goodbye, 1, client.session_id(), None),
            peer.addr,
        )
        .await;
    client.on_timeout().await;

    assert_eq!(client.seq(), seq);
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn close_is_idempotent() {
    let (mut client, _peer, cancel) = ready_client(Some(INTERVAL)).await;

    client.close();
    client.close();

    assert_eq!(client.state(), ClientState::Closed);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn outbound_seq_covers_zero_to_n() {
    let (mut client, peer, _cancel) = ready_client(None).await;

    client.send_data("a").await;
    client.send_data("b").await;
    client.send_goodbye().await;
    assert_eq!(client.seq(), 4);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (_, seq, _) = peer.recv_command().await;
        seen.push(seq);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

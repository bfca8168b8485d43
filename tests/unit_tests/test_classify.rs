// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, net::SocketAddr};

use p0p::{
    server::{Action, SessionRecord, classify::classify},
    wire::{self, Command},
};

const SID: u32 = 0x42;

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

fn client_addr() -> SocketAddr {
    addr("10.0.0.1:5000")
}

/// One established session with the given previous packet.
fn table_with(prev_seq: u32, prev_command: Command) -> HashMap<u32, SessionRecord> {
    let record = SessionRecord::new(SID, client_addr(), prev_seq, prev_command.raw());
    HashMap::from([(SID, record)])
}

fn empty_table() -> HashMap<u32, SessionRecord> {
    HashMap::new()
}

#[test]
fn short_packet_is_ignored() {
    let verdict = classify(b"sodkf", client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn mismatched_magic_is_ignored() {
    let mut raw = wire::encode(Command::Hello, 0, 0, None).to_vec();
    raw[0] = 0x00;
    raw[1] = 0xea;

    let verdict = classify(&raw, client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn mismatched_version_is_ignored() {
    let mut raw = wire::encode(Command::Hello, 0, 0, None).to_vec();
    raw[2] = 2;

    let verdict = classify(&raw, client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn unknown_session_with_nonzero_seq_is_ignored() {
    let packet = wire::encode(Command::Hello, 1, SID, None);
    let verdict = classify(&packet, client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn unknown_session_without_hello_is_ignored() {
    let packet = wire::encode(Command::Data, 0, SID, Some("a"));
    let verdict = classify(&packet, client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn first_hello_is_accepted() {
    let packet = wire::encode(Command::Hello, 0, SID, None);
    let verdict = classify(&packet, client_addr(), &empty_table());
    assert_eq!(verdict.action, Action::Normal);
    assert!(!verdict.duplicate);
    assert_eq!(verdict.lost, None);
}

#[test]
fn known_session_from_different_host_is_ignored() {
    let table = table_with(0, Command::Hello);
    let packet = wire::encode(Command::Data, 1, SID, Some("a"));

    let verdict = classify(&packet, addr("10.0.0.2:5000"), &table);
    assert_eq!(verdict.action, Action::Ignore);
    assert!(!verdict.duplicate);
}

#[test]
fn known_session_from_different_port_is_ignored() {
    let table = table_with(0, Command::Hello);
    let packet = wire::encode(Command::Data, 1, SID, Some("a"));

    let verdict = classify(&packet, addr("10.0.0.1:5001"), &table);
    assert_eq!(verdict.action, Action::Ignore);
}

#[test]
fn duplicate_with_same_command_is_ignored_and_flagged() {
    let table = table_with(0, Command::Hello);
    let packet = wire::encode(Command::Hello, 0, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Ignore);
    assert!(verdict.duplicate);
}

#[test]
fn duplicate_with_different_command_closes() {
    let table = table_with(0, Command::Hello);
    let packet = wire::encode(Command::Data, 0, SID, Some("a"));

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
    assert!(!verdict.duplicate);
}

#[test]
fn out_of_order_delivery_closes() {
    let table = table_with(2, Command::Data);
    let packet = wire::encode(Command::Data, 1, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
}

#[test]
fn sequence_gap_reports_every_lost_packet() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Data, 6, SID, Some("x"));

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Normal);
    assert_eq!(verdict.lost, Some(2..6));
}

#[test]
fn consecutive_seq_reports_nothing_lost() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Data, 2, SID, Some("x"));

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Normal);
    assert_eq!(verdict.lost, None);
}

#[test]
fn hello_on_established_session_closes() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Hello, 2, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
}

#[test]
fn alive_from_client_closes() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Alive, 2, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
}

#[test]
fn goodbye_on_established_session_is_normal() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Goodbye, 2, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Normal);
}

#[test]
fn data_on_established_session_is_normal() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Data, 2, SID, Some("a"));

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Normal);
}

#[test]
fn unknown_command_on_established_session_closes() {
    let table = table_with(1, Command::Data);
    let packet = wire::encode_raw(100, 2, SID, Some("a"));

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
}

#[test]
fn lost_packets_still_reported_when_the_command_closes() {
    // the gap is observed before the command is judged
    let table = table_with(1, Command::Data);
    let packet = wire::encode(Command::Hello, 5, SID, None);

    let verdict = classify(&packet, client_addr(), &table);
    assert_eq!(verdict.action, Action::Close);
    assert_eq!(verdict.lost, Some(2..5));
}

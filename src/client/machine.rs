// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use crate::wire;

/// Session lifecycle as seen from the client.
///
/// Both drivers keep the session as a handful of flags and derive this enum
/// from them; the flags are what the per-field locks of the threaded driver
/// protect, so the enum never has to be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    WaitingForHello,
    Ready,
    Closing,
    Closed,
}

/// Folds the client flags into a [`ClientState`].
pub fn derive_state(closed: bool, waiting_for_hello: bool, can_send_goodbye: bool) -> ClientState {
    if closed {
        ClientState::Closed
    } else if !can_send_goodbye {
        ClientState::Closing
    } else if waiting_for_hello {
        ClientState::WaitingForHello
    } else {
        ClientState::Ready
    }
}

/// Snapshot of the session fields the inbound dispatch depends on.
#[derive(Debug, Clone, Copy)]
pub struct SessionView {
    pub server_addr: SocketAddr,
    pub session_id: u32,
    pub waiting_for_hello: bool,
    /// True once GOODBYE went out (the timer deadline must stand).
    pub closing: bool,
}

/// What an inbound datagram means for the session.
///
/// The drivers apply the verdict under their own locking and timer
/// mechanics; the decision itself is shared and pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Wrong source, short datagram, or bad magic/version. State unchanged.
    Ignore,
    /// The handshake reply arrived; the session is up.
    HelloOk,
    /// First packet of the handshake was not HELLO: goodbye and close.
    HelloUnexpected,
    /// Server ended the session; close without replying.
    Goodbye,
    /// Liveness ack while the session is up: clear the timer.
    AliveReady,
    /// Liveness ack after our GOODBYE: the goodbye deadline stands.
    AliveClosing,
    /// Anything else the server has no business sending: goodbye and close.
    Invalid,
}

/// Classifies one inbound datagram against the current session state.
pub fn dispatch(view: &SessionView, datagram: &[u8], src: SocketAddr) -> Verdict {
    if src != view.server_addr {
        return Verdict::Ignore;
    }
    let Ok((header, _)) = wire::decode(datagram) else {
        return Verdict::Ignore;
    };
    if !header.magic_ok() {
        return Verdict::Ignore;
    }

    if header.session_id.get() != view.session_id {
        return Verdict::Invalid;
    }

    if view.waiting_for_hello {
        return match header.command() {
            Some(wire::Command::Hello) => Verdict::HelloOk,
            _ => Verdict::HelloUnexpected,
        };
    }

    match header.command() {
        Some(wire::Command::Goodbye) => Verdict::Goodbye,
        Some(wire::Command::Alive) if view.closing => Verdict::AliveClosing,
        Some(wire::Command::Alive) => Verdict::AliveReady,
        _ => Verdict::Invalid,
    }
}

/// What a timer expiry means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// First expiry: send GOODBYE and wait out one more interval.
    SendGoodbye,
    /// Second expiry (GOODBYE already out): close for good.
    Close,
}

/// Two successive timeouts terminate the session.
pub fn timeout_action(can_send_goodbye: bool) -> TimeoutAction {
    if can_send_goodbye {
        TimeoutAction::SendGoodbye
    } else {
        TimeoutAction::Close
    }
}

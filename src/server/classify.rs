// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, net::SocketAddr, ops::Range};

use crate::{
    server::session::SessionRecord,
    wire::{self, Command},
};

/// What the handler should do with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Legitimate traffic; process the command.
    Normal,
    /// Drop without touching any state.
    Ignore,
    /// Protocol anomaly; terminate the session.
    Close,
}

/// Classification result.
///
/// `duplicate` and `lost` carry the log lines the verdict calls for, so the
/// decision stays a pure function and the handler owns the side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    /// The packet repeats the previously accepted one verbatim.
    pub duplicate: bool,
    /// Sequence numbers skipped between the previous packet and this one.
    pub lost: Option<Range<u32>>,
}

impl Verdict {
    fn plain(action: Action) -> Self {
        Self {
            action,
            duplicate: false,
            lost: None,
        }
    }
}

/// Maps (packet, source address, session state) to an action.
///
/// Rules are evaluated in order: header sanity, unknown-session handling,
/// source check, then sequence/command checks against the session record.
pub fn classify(
    packet: &[u8],
    src: SocketAddr,
    sessions: &HashMap<u32, SessionRecord>,
) -> Verdict {
    let Ok((header, _)) = wire::decode(packet) else {
        return Verdict::plain(Action::Ignore);
    };
    if !header.magic_ok() {
        return Verdict::plain(Action::Ignore);
    }

    let seq = header.seq.get();
    let command = header.command;

    let Some(record) = sessions.get(&header.session_id.get()) else {
        // only a fresh handshake may open a session
        let accept = seq == 0 && command == Command::Hello.raw();
        return Verdict::plain(if accept { Action::Normal } else { Action::Ignore });
    };

    // known session id from somewhere else: drop, do not terminate
    if src != record.address {
        return Verdict::plain(Action::Ignore);
    }

    if seq == record.prev_seq {
        let repeatable = [
            Command::Hello.raw(),
            Command::Data.raw(),
            Command::Goodbye.raw(),
        ];
        if command == record.prev_command && repeatable.contains(&command) {
            return Verdict {
                action: Action::Ignore,
                duplicate: true,
                lost: None,
            };
        }
        return Verdict::plain(Action::Close);
    }

    if seq < record.prev_seq {
        // out-of-order delivery; wrap-around is not handled
        return Verdict::plain(Action::Close);
    }

    let lost = (seq > record.prev_seq + 1).then(|| record.prev_seq + 1..seq);

    let action = match Command::from_raw(command) {
        // a second handshake on a live session
        Some(Command::Hello) => Action::Close,
        // the server never receives its own ack
        Some(Command::Alive) => Action::Close,
        Some(Command::Data) | Some(Command::Goodbye) => Action::Normal,
        None => Action::Close,
    };

    Verdict {
        action,
        duplicate: false,
        lost,
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, time::Instant};

/// Per-session bookkeeping on the server.
///
/// `prev_seq`/`prev_command` describe the last packet accepted from the
/// client; `last_activity` is bumped whenever one is processed and drives
/// the idle reaper.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: u32,
    pub address: SocketAddr,
    pub prev_seq: u32,
    pub prev_command: u8,
    pub last_activity: Instant,
}

impl SessionRecord {
    pub fn new(session_id: u32, address: SocketAddr, seq: u32, command: u8) -> Self {
        Self {
            session_id,
            address,
            prev_seq: seq,
            prev_command: command,
            last_activity: Instant::now(),
        }
    }
}

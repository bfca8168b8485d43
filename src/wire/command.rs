// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

/// The four commands of the protocol.
///
/// The header stores the command as a raw byte; anything outside this set
/// still decodes (the classifier decides what to do with it), which is why
/// conversion from the wire goes through [`Command::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Hello = 0,
    Data = 1,
    Alive = 2,
    Goodbye = 3,
}

impl Command {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Command::Hello),
            1 => Some(Command::Data),
            2 => Some(Command::Alive),
            3 => Some(Command::Goodbye),
            _ => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Hello => "HELLO",
            Command::Data => "DATA",
            Command::Alive => "ALIVE",
            Command::Goodbye => "GOODBYE",
        })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
    Unaligned,
};

use crate::wire::command::Command;

pub const HEADER_LEN: usize = 12;

/// Every packet this protocol speaks starts with `0xC356`.
pub const MAGIC: u16 = 0xC356;
pub const VERSION: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram shorter than the {HEADER_LEN}-byte header")]
    MalformedHeader,
}

/// Fixed packet header, network byte order.
///
/// `magic` and `version` are carried as-is; whether they are acceptable is a
/// policy decision made by the packet classifiers, not here. `command` stays
/// a raw byte for the same reason.
#[repr(C)]
#[derive(Debug, PartialEq, Eq, ZFromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Header {
    pub magic: U16<BigEndian>,
    pub version: u8,
    pub command: u8,
    pub seq: U32<BigEndian>,
    pub session_id: U32<BigEndian>,
}

impl Header {
    pub fn new(command: u8, seq: u32, session_id: u32) -> Self {
        Header {
            magic: U16::new(MAGIC),
            version: VERSION,
            command,
            seq: U32::new(seq),
            session_id: U32::new(session_id),
        }
    }

    #[inline]
    pub fn magic_ok(&self) -> bool {
        self.magic.get() == MAGIC && self.version == VERSION
    }

    #[inline]
    pub fn command(&self) -> Option<Command> {
        Command::from_raw(self.command)
    }
}

/// Encodes a packet with a known command.
pub fn encode(command: Command, seq: u32, session_id: u32, payload: Option<&str>) -> Bytes {
    encode_raw(command.raw(), seq, session_id, payload)
}

/// Encodes a packet with an arbitrary command byte.
///
/// The payload rides behind the header verbatim; its length is implicit in
/// the datagram size.
pub fn encode_raw(command: u8, seq: u32, session_id: u32, payload: Option<&str>) -> Bytes {
    let header = Header::new(command, seq, session_id);
    let mut buf =
        BytesMut::with_capacity(HEADER_LEN + payload.map_or(0, str::len));
    buf.put_slice(header.as_bytes());
    if let Some(text) = payload {
        buf.put_slice(text.as_bytes());
    }
    buf.freeze()
}

/// Splits a datagram into its header view and payload tail.
pub fn decode(datagram: &[u8]) -> Result<(&Header, &[u8]), WireError> {
    Header::ref_from_prefix(datagram).map_err(|_| WireError::MalformedHeader)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire format: the fixed 12-byte packet header and its codec.

/// Command byte carried in every packet header.
pub mod command;
/// Header layout plus encode/decode.
pub mod header;

pub use command::Command;
pub use header::{HEADER_LEN, Header, WireError, decode, encode, encode_raw};

/// Largest datagram either endpoint reads in one recv.
pub const MAX_DATAGRAM: usize = 4096;

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server side of the protocol: session table, packet classifier, handler,
//! and the buffered protocol-log sink.

/// Pure packet classification.
pub mod classify;
/// The server itself: socket, session table, handler, reaper, shutdown.
pub mod core;
/// Per-session record.
pub mod session;
/// Buffered sink for the protocol log lines.
pub mod sink;

pub use self::core::Server;

pub use classify::{Action, Verdict};
pub use session::SessionRecord;
pub use sink::BufferedLog;

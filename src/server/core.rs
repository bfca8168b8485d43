// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{
    server::{
        classify::{self, Action},
        session::SessionRecord,
        sink::BufferedLog,
    },
    wire::{self, Command},
};

/// How long a blocking receive waits before re-checking `closed`.
pub const RECV_POLL: Duration = Duration::from_millis(50);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The server: one datagram socket multiplexing every session.
///
/// All session mutation happens under the table mutex; the gate serialises
/// packet handling and reaping against shutdown, so `close` can drain an
/// in-flight handler before emitting the final goodbyes. The outbound `seq`
/// is one counter shared across all sessions.
#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
    seq: AtomicU32,
    sessions: Mutex<HashMap<u32, SessionRecord>>,
    sink: BufferedLog,
    timeout_interval: Option<Duration>,
    /// True once closed; guarded by the gate that handlers hold.
    gate: Mutex<bool>,
}

impl Server {
    pub fn bind(
        addr: impl ToSocketAddrs,
        sink: BufferedLog,
        timeout_interval: Option<Duration>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context("failed to bind server socket")?;
        socket
            .set_read_timeout(Some(RECV_POLL))
            .context("failed to set read timeout")?;

        Ok(Self {
            socket,
            seq: AtomicU32::new(0),
            sessions: Mutex::new(HashMap::new()),
            sink,
            timeout_interval,
            gate: Mutex::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.gate)
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn lookup(&self, session_id: u32) -> Option<SessionRecord> {
        lock(&self.sessions).get(&session_id).cloned()
    }

    /// Outbound packets sent so far (also the next outbound seq).
    pub fn seq(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn flush_logs(&self) {
        self.sink.flush(None);
    }

    fn send_packet(&self, address: SocketAddr, command: Command, session_id: u32) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let datagram = wire::encode(command, seq, session_id, None);
        if let Err(e) = self.socket.send_to(&datagram, address) {
            debug!("send failed: {e}");
        }
    }

    fn log(&self, session_id: u32, seq: Option<u32>, msg: &str) {
        match seq {
            Some(seq) => self.sink.push(format!("0x{session_id:08x} [{seq}] {msg}")),
            None => self.sink.push(format!("0x{session_id:08x} {msg}")),
        }
    }

    /// Classifies and processes one inbound datagram.
    ///
    /// Returns the command of the reply that went out, if any; handy for the
    /// driver's accounting and for tests.
    pub fn handle_datagram(&self, packet: &[u8], src: SocketAddr) -> Option<Command> {
        let gate = lock(&self.gate);
        if *gate {
            return None;
        }

        let Ok((header, payload)) = wire::decode(packet) else {
            return None;
        };
        let session_id = header.session_id.get();
        let seq = header.seq.get();

        let mut sessions = lock(&self.sessions);
        let verdict = classify::classify(packet, src, &sessions);

        if verdict.duplicate {
            self.log(session_id, Some(seq), "Duplicate packet!");
        }
        if let Some(range) = verdict.lost.clone() {
            for missing in range {
                self.log(session_id, Some(missing), "Lost packet!");
            }
        }

        match verdict.action {
            Action::Ignore => None,
            Action::Close => {
                let record = sessions.remove(&session_id)?;
                self.send_packet(record.address, Command::Goodbye, session_id);
                self.log(session_id, None, "Session Closed");
                Some(Command::Goodbye)
            },
            Action::Normal => match header.command() {
                Some(Command::Hello) => {
                    self.send_packet(src, Command::Hello, session_id);
                    self.log(session_id, Some(seq), "Session created");
                    sessions.insert(
                        session_id,
                        SessionRecord::new(session_id, src, seq, header.command),
                    );
                    Some(Command::Hello)
                },
                Some(Command::Data) => {
                    let record = sessions.get_mut(&session_id)?;
                    record.prev_seq = seq;
                    record.prev_command = header.command;
                    record.last_activity = std::time::Instant::now();

                    let text = String::from_utf8_lossy(payload);
                    self.send_packet(src, Command::Alive, session_id);
                    self.log(session_id, Some(seq), text.trim_end());
                    Some(Command::Alive)
                },
                Some(Command::Goodbye) => {
                    let record = sessions.remove(&session_id)?;
                    self.log(session_id, Some(seq), "GOODBYE from client.");
                    self.send_packet(record.address, Command::Goodbye, session_id);
                    self.log(session_id, None, "Session Closed");
                    Some(Command::Goodbye)
                },
                // the classifier never maps these to Normal
                _ => unreachable!("classifier accepted an invalid command"),
            },
        }
    }

    /// Reaps sessions whose last activity is older than the timeout.
    ///
    /// Takes a snapshot of the ids, then re-validates each entry under the
    /// table mutex before touching it.
    pub fn prune_idle(&self) {
        let gate = lock(&self.gate);
        if *gate {
            return;
        }
        let Some(interval) = self.timeout_interval else {
            return;
        };

        let ids: Vec<u32> = lock(&self.sessions).keys().copied().collect();
        for session_id in ids {
            let mut sessions = lock(&self.sessions);
            let idle = sessions
                .get(&session_id)
                .is_some_and(|r| r.last_activity.elapsed() > interval);
            if idle && let Some(record) = sessions.remove(&session_id) {
                self.send_packet(record.address, Command::Goodbye, session_id);
                self.log(session_id, None, "Session Closed");
            }
        }
    }

    /// Waits up to [`RECV_POLL`] for a datagram.
    pub fn receive_packet(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        match self.socket.recv_from(buf) {
            Ok(got) => Some(got),
            Err(e) => {
                if !matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) {
                    debug!("recv failed: {e}");
                }
                None
            },
        }
    }

    /// Shuts the server down: drains any in-flight handler, says goodbye to
    /// every remaining session, and flushes the log sink. Idempotent.
    pub fn close(&self) {
        let mut gate = lock(&self.gate);
        if *gate {
            return;
        }
        *gate = true;

        let mut sessions = lock(&self.sessions);
        for (session_id, record) in sessions.drain() {
            self.send_packet(record.address, Command::Goodbye, session_id);
            self.log(session_id, None, "Session Closed");
        }
        drop(sessions);
        drop(gate);

        self.sink.close();
    }
}

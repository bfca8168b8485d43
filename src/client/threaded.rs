// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::RngExt;
use tracing::{debug, info, warn};

use crate::{
    client::machine::{self, ClientState, SessionView, TimeoutAction, Verdict},
    wire::{self, Command},
};

/// How long a blocking receive waits before re-checking `closed`.
///
/// Std UDP sockets cannot be shut down from another thread, so cancellation
/// is a poll: the receive loop wakes at this cadence and observes the flag.
pub const RECV_POLL: Duration = Duration::from_millis(50);

/// Items delivered on the signalling queue.
///
/// `Hello` tells the supervising thread the session is up; `Close` tells it
/// the session is over. At most one `Close` is ever enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Hello,
    Close,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-based client.
///
/// One thread blocks on the socket and feeds [`ThreadClient::handle_packet`],
/// a second periodically calls [`ThreadClient::timed_out`], and the
/// supervising thread sends data and waits on the signal queue. The flags
/// are individually locked; any path that takes several of them does so in
/// the order `closed`, `can_send`, (`can_send_goodbye` | `waiting_for_hello`),
/// `timestamp`, never in reverse.
#[derive(Debug)]
pub struct ThreadClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: u32,
    seq: AtomicU32,
    timeout_interval: Option<Duration>,

    closed: Mutex<bool>,
    can_send_data: Mutex<bool>,
    can_send_goodbye: Mutex<bool>,
    waiting_for_hello: Mutex<bool>,
    timestamp: Mutex<Option<Instant>>,

    signal_tx: mpsc::Sender<Signal>,
    signal_rx: Mutex<mpsc::Receiver<Signal>>,
    close_signalled: AtomicBool,
}

impl ThreadClient {
    pub fn new(server_addr: SocketAddr, timeout_interval: Option<Duration>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind client socket")?;
        socket
            .set_read_timeout(Some(RECV_POLL))
            .context("failed to set read timeout")?;

        let (signal_tx, signal_rx) = mpsc::channel();

        Ok(Self {
            socket,
            server_addr,
            session_id: rand::rng().random::<u32>(),
            seq: AtomicU32::new(0),
            timeout_interval,
            closed: Mutex::new(false),
            can_send_data: Mutex::new(true),
            can_send_goodbye: Mutex::new(true),
            waiting_for_hello: Mutex::new(true),
            timestamp: Mutex::new(None),
            signal_tx,
            signal_rx: Mutex::new(signal_rx),
            close_signalled: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Number of packets sent so far (also the next outbound seq).
    pub fn seq(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    pub fn is_waiting_for_hello(&self) -> bool {
        *lock(&self.waiting_for_hello)
    }

    pub fn state(&self) -> ClientState {
        machine::derive_state(
            self.is_closed(),
            self.is_waiting_for_hello(),
            *lock(&self.can_send_goodbye),
        )
    }

    /// Blocks until the other threads signal, or the client is torn down.
    pub fn wait_for_signal(&self) -> Signal {
        lock(&self.signal_rx).recv().unwrap_or(Signal::Close)
    }

    /// Non-blocking look at the queue; used by tests and shutdown paths.
    pub fn try_signal(&self) -> Option<Signal> {
        lock(&self.signal_rx).try_recv().ok()
    }

    /// Marks the session as terminating and wakes the supervising thread.
    ///
    /// Safe to call any number of times; only the first call enqueues the
    /// `Close` sentinel.
    pub fn signal_close(&self) {
        {
            // in case we never sent a goodbye (server went away first)
            let mut data = lock(&self.can_send_data);
            let mut goodbye = lock(&self.can_send_goodbye);
            *data = false;
            *goodbye = false;
        }
        if !self.close_signalled.swap(true, Ordering::SeqCst) {
            let _ = self.signal_tx.send(Signal::Close);
        }
    }

    fn send_packet(&self, command: u8, payload: Option<&str>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let datagram = wire::encode_raw(command, seq, self.session_id, payload);
        if let Err(e) = self.socket.send_to(&datagram, self.server_addr) {
            debug!("send failed: {e}");
        }
    }

    /// Opens the session and arms the handshake deadline.
    pub fn send_hello(&self) {
        if self.timeout_interval.is_some() {
            *lock(&self.timestamp) = Some(Instant::now());
        }
        self.send_packet(Command::Hello.raw(), None);
    }

    pub fn send_data(&self, text: &str) {
        let can_send = lock(&self.can_send_data);
        if *can_send && !*lock(&self.waiting_for_hello) {
            if self.timeout_interval.is_some() {
                let mut ts = lock(&self.timestamp);
                if ts.is_none() {
                    *ts = Some(Instant::now());
                }
            }
            self.send_packet(Command::Data.raw(), Some(text));
        }
    }

    /// Sends GOODBYE once, restarts the timer, and enters the closing state.
    pub fn send_goodbye(&self) {
        let mut data = lock(&self.can_send_data);
        let mut goodbye = lock(&self.can_send_goodbye);
        if *goodbye {
            if self.timeout_interval.is_some() {
                *lock(&self.timestamp) = Some(Instant::now());
            }
            *data = false;
            *goodbye = false;
            self.send_packet(Command::Goodbye.raw(), None);
        }
    }

    pub fn handle_packet(&self, datagram: &[u8], src: SocketAddr) {
        if *lock(&self.closed) {
            return;
        }

        let view = SessionView {
            server_addr: self.server_addr,
            session_id: self.session_id,
            waiting_for_hello: *lock(&self.waiting_for_hello),
            closing: !*lock(&self.can_send_goodbye),
        };

        match machine::dispatch(&view, datagram, src) {
            Verdict::Ignore => {},
            Verdict::HelloOk => {
                *lock(&self.waiting_for_hello) = false;
                *lock(&self.timestamp) = None;
                let _ = self.signal_tx.send(Signal::Hello);
            },
            Verdict::HelloUnexpected => {
                *lock(&self.waiting_for_hello) = false;
                *lock(&self.timestamp) = None;
                warn!("handshake reply was not HELLO");
                self.send_goodbye();
                self.signal_close();
            },
            Verdict::Goodbye => {
                info!("GOODBYE from server.");
                self.signal_close();
            },
            Verdict::AliveReady => {
                *lock(&self.timestamp) = None;
            },
            Verdict::AliveClosing => {},
            Verdict::Invalid => {
                warn!("unexpected packet from server");
                self.send_goodbye();
                self.signal_close();
            },
        }
    }

    /// Tick routine: checks the timestamp-based timer and escalates.
    ///
    /// Returns whether a timeout fired.
    pub fn timed_out(&self) -> bool {
        if *lock(&self.closed) {
            return false;
        }
        let Some(interval) = self.timeout_interval else {
            return false;
        };

        let expired = lock(&self.timestamp).is_some_and(|ts| ts.elapsed() > interval);
        if !expired {
            return false;
        }

        info!("timed out");
        // a timeout always ends the handshake wait
        *lock(&self.waiting_for_hello) = false;

        let goodbye = *lock(&self.can_send_goodbye);
        match machine::timeout_action(goodbye) {
            TimeoutAction::SendGoodbye => self.send_goodbye(),
            TimeoutAction::Close => self.close(),
        }
        true
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

    /// Final teardown. Idempotent; also wakes any signal-queue waiter.
    pub fn close(&self) {
        {
            let mut closed = lock(&self.closed);
            if *closed {
                return;
            }
            *closed = true;
        }
        self.signal_close();
    }
}

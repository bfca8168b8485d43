// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{future::pending, io::IsTerminal, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use rand::RngExt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::UdpSocket,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::machine::{self, ClientState, SessionView, TimeoutAction, Verdict},
    wire::{self, Command, MAX_DATAGRAM},
};

/// Event-loop client.
///
/// Everything runs on one task: datagram receives, the oneshot deadline, and
/// stdin lines are raced in a single `select!` loop, so no field needs a
/// lock. Close is delivered through the [`CancellationToken`] handed in at
/// construction, which tears the loop down.
#[derive(Debug)]
pub struct EventClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: u32,
    seq: u32,
    timeout_interval: Option<Duration>,

    waiting_for_hello: bool,
    can_send_data: bool,
    can_send_goodbye: bool,
    closed: bool,

    /// Armed oneshot deadline; `None` means the timer is stopped.
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl EventClient {
    pub async fn connect(
        server_addr: SocketAddr,
        timeout_interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind client socket")?;

        Ok(Self {
            socket,
            server_addr,
            session_id: rand::rng().random::<u32>(),
            seq: 0,
            timeout_interval,
            waiting_for_hello: true,
            can_send_data: true,
            can_send_goodbye: true,
            closed: false,
            deadline: None,
            cancel,
        })
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn state(&self) -> ClientState {
        machine::derive_state(self.closed, self.waiting_for_hello, self.can_send_goodbye)
    }

    pub fn timer_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn arm_timer(&mut self) {
        if let Some(interval) = self.timeout_interval {
            self.deadline = Some(Instant::now() + interval);
        }
    }

    async fn send_packet(&mut self, command: u8, payload: Option<&str>) {
        let datagram = wire::encode_raw(command, self.seq, self.session_id, payload);
        self.seq += 1;
        if let Err(e) = self.socket.send_to(&datagram, self.server_addr).await {
            debug!("send failed: {e}");
        }
    }

    pub async fn send_hello(&mut self) {
        self.arm_timer();
        self.send_packet(Command::Hello.raw(), None).await;
    }

    pub async fn send_data(&mut self, text: &str) {
        if self.can_send_data && !self.waiting_for_hello {
            if self.deadline.is_none() {
                self.arm_timer();
            }
            self.send_packet(Command::Data.raw(), Some(text)).await;
        }
    }

    pub async fn send_goodbye(&mut self) {
        if self.can_send_goodbye {
            self.arm_timer();
            self.can_send_data = false;
            self.can_send_goodbye = false;
            self.send_packet(Command::Goodbye.raw(), None).await;
        }
    }

    pub async fn handle_packet(&mut self, datagram: &[u8], src: SocketAddr) {
        if self.closed {
            return;
        }

        let view = SessionView {
            server_addr: self.server_addr,
            session_id: self.session_id,
            waiting_for_hello: self.waiting_for_hello,
            closing: !self.can_send_goodbye,
        };

        match machine::dispatch(&view, datagram, src) {
            Verdict::Ignore => {},
            Verdict::HelloOk => {
                self.waiting_for_hello = false;
                self.deadline = None;
            },
            Verdict::HelloUnexpected => {
                self.waiting_for_hello = false;
                self.deadline = None;
                warn!("handshake reply was not HELLO");
                self.send_goodbye().await;
                self.close();
            },
            Verdict::Goodbye => {
                info!("GOODBYE from server.");
                self.close();
            },
            Verdict::AliveReady => {
                self.deadline = None;
            },
            Verdict::AliveClosing => {},
            Verdict::Invalid => {
                warn!("unexpected packet from server");
                self.send_goodbye().await;
                self.close();
            },
        }
    }

    /// The oneshot deadline fired.
    pub async fn on_timeout(&mut self) {
        if self.closed {
            return;
        }
        info!("timed out");
        self.waiting_for_hello = false;
        self.deadline = None;

        match machine::timeout_action(self.can_send_goodbye) {
            TimeoutAction::SendGoodbye => self.send_goodbye().await,
            TimeoutAction::Close => self.close(),
        }
    }

    /// Tears down the loop. Idempotent.
    pub fn close(&mut self) {
        self.can_send_data = false;
        self.can_send_goodbye = false;
        self.closed = true;
        self.deadline = None;
        self.cancel.cancel();
    }

    /// Drives the session to completion: handshake, stdin lines as DATA,
    /// GOODBYE on `q`/EOF, until the cancellation token fires.
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let interactive = std::io::stdin().is_terminal();
        let mut stdin_open = true;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let cancel = self.cancel.clone();

        self.send_hello().await;

        loop {
            let deadline = self.deadline;
            let want_stdin = stdin_open && self.state() == ClientState::Ready;

            let event = tokio::select! {
                _ = cancel.cancelled() => Event::Done,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => Event::Packet(len, src),
                    Err(e) => {
                        debug!("recv failed: {e}");
                        continue;
                    },
                },
                _ = deadline_elapsed(deadline) => Event::Timeout,
                line = lines.next_line(), if want_stdin => {
                    Event::Line(line.unwrap_or_default())
                },
            };

            match event {
                Event::Done => break,
                Event::Packet(len, src) => self.handle_packet(&buf[..len], src).await,
                Event::Timeout => self.on_timeout().await,
                Event::Line(None) => {
                    stdin_open = false;
                    self.send_goodbye().await;
                },
                Event::Line(Some(line)) => {
                    if interactive && line == "q" {
                        stdin_open = false;
                        self.send_goodbye().await;
                    } else if !line.is_empty() {
                        self.send_data(&line).await;
                    }
                },
            }
        }

        Ok(())
    }
}

enum Event {
    Done,
    Packet(usize, SocketAddr),
    Timeout,
    Line(Option<String>),
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

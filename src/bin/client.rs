// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::{BufRead, IsTerminal},
    net::SocketAddr,
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use p0p::{
    cfg::{cli, config::Config, logger::init_logger},
    client::{
        event::EventClient,
        machine::ClientState,
        threaded::{Signal, ThreadClient},
    },
    wire::MAX_DATAGRAM,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

fn main() -> Result<()> {
    let args = cli::parse_client_args(std::env::args().skip(1))?;
    let cfg = cli::load_config(args.config.as_deref())?;
    let _logger_guard = init_logger(&cfg.runtime.log_level)?;

    let server_addr = cli::resolve_server_addr(&args.host, args.port)?;

    if args.threaded {
        run_threaded(server_addr, &cfg)
    } else {
        run_event(server_addr, &cfg)
    }
}

/// Event-loop driver: a current-thread runtime with one select loop.
fn run_event(server_addr: SocketAddr, cfg: &Config) -> Result<()> {
    let timeout = cfg.timeout();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    rt.block_on(async move {
        let client = EventClient::connect(server_addr, timeout, CancellationToken::new()).await?;
        client.run().await
    })?;

    info!("client closed");
    Ok(())
}

/// Thread driver: a receive thread, a timeout ticker, and the main thread
/// waiting on the signal queue while it feeds stdin lines into the session.
fn run_threaded(server_addr: SocketAddr, cfg: &Config) -> Result<()> {
    let client = Arc::new(ThreadClient::new(server_addr, cfg.timeout())?);

    let receiver = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while !client.is_closed() {
                if let Some((len, src)) = client.receive_packet(&mut buf) {
                    client.handle_packet(&buf[..len], src);
                }
            }
        })
    };

    let ticker = {
        let client = Arc::clone(&client);
        let tick = cfg.runtime.tick_interval;
        thread::spawn(move || {
            while !client.is_closed() {
                thread::sleep(tick);
                client.timed_out();
            }
        })
    };

    // stop-and-wait handshake: stdin is not touched until the session is up
    client.send_hello();
    if client.wait_for_signal() == Signal::Hello {
        let interactive = std::io::stdin().is_terminal();
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if client.state() != ClientState::Ready {
                break;
            }
            if interactive && line == "q" {
                break;
            }
            if !line.is_empty() {
                client.send_data(&line);
            }
        }

        client.send_goodbye();
        while client.wait_for_signal() != Signal::Close {}
    }

    client.close();
    let _ = receiver.join();
    let _ = ticker.join();
    info!("client closed");
    Ok(())
}

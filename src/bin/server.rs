// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::{BufRead, IsTerminal},
    sync::Arc,
    thread,
};

use anyhow::Result;
use p0p::{
    cfg::{cli, logger::init_logger},
    server::{BufferedLog, Server},
    wire::MAX_DATAGRAM,
};
use tracing::info;

fn main() -> Result<()> {
    let args = cli::parse_server_args(std::env::args().skip(1))?;
    let cfg = cli::load_config(args.config.as_deref())?;
    let _logger_guard = init_logger(&cfg.runtime.log_level)?;

    let server = Arc::new(Server::bind(
        ("0.0.0.0", args.port),
        BufferedLog::stdout(),
        cfg.timeout(),
    )?);
    info!("listening on {}", server.local_addr()?);

    let receiver = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while !server.is_closed() {
                if let Some((len, src)) = server.receive_packet(&mut buf) {
                    server.handle_datagram(&buf[..len], src);
                    server.flush_logs();
                }
            }
        })
    };

    let reaper = {
        let server = Arc::clone(&server);
        let tick = cfg.runtime.tick_interval;
        thread::spawn(move || {
            while !server.is_closed() {
                thread::sleep(tick);
                server.prune_idle();
                server.flush_logs();
            }
        })
    };

    // stdin stays on the main thread: `q` on a terminal or EOF shuts down
    let interactive = std::io::stdin().is_terminal();
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if interactive && line == "q" {
            break;
        }
    }

    server.close();
    let _ = receiver.join();
    let _ = reaper.join();
    info!("server closed");
    Ok(())
}

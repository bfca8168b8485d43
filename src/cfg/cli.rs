// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail, ensure};

use crate::cfg::config::Config;

#[derive(Debug, Clone)]
pub struct ServerArgs {
    pub port: u16,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientArgs {
    pub host: String,
    pub port: u16,
    /// Use the thread-per-concern driver instead of the event loop.
    pub threaded: bool,
    pub config: Option<PathBuf>,
}

/// `server <port> [config.yaml]`
pub fn parse_server_args(mut args: impl Iterator<Item = String>) -> Result<ServerArgs> {
    let Some(port) = args.next() else {
        bail!("usage: server <port> [config.yaml]");
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port {port:?}"))?;
    let config = args.next().map(PathBuf::from);
    if args.next().is_some() {
        bail!("usage: server <port> [config.yaml]");
    }
    Ok(ServerArgs { port, config })
}

/// `client <host> <port> [--threaded] [config.yaml]`
pub fn parse_client_args(args: impl Iterator<Item = String>) -> Result<ClientArgs> {
    const USAGE: &str = "usage: client <host> <port> [--threaded] [config.yaml]";

    let mut threaded = false;
    let mut positional = Vec::with_capacity(3);
    for arg in args {
        if arg == "--threaded" {
            threaded = true;
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let (Some(host), Some(port)) = (positional.next(), positional.next()) else {
        bail!(USAGE);
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port {port:?}"))?;
    let config = positional.next().map(PathBuf::from);
    if positional.next().is_some() {
        bail!(USAGE);
    }

    Ok(ClientArgs {
        host,
        port,
        threaded,
        config,
    })
}

/// Blocking name resolution for the server endpoint.
pub fn resolve_server_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address found for {host}:{port}"))
}

/// Loads the runtime configuration, falling back to the defaults when no
/// file was named on the command line.
///
/// Relative paths are taken from the working directory. Only YAML is
/// accepted; a stray positional argument that is not a config file should
/// fail here rather than parse as an empty config.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    ensure!(
        matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        ),
        "config file {path:?} must be a .yaml or .yml file"
    );

    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(path)
    };

    Config::load_from_file(&resolved)
        .with_context(|| format!("failed to load config {resolved:?}"))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Knobs that shape on-the-wire behaviour.
    pub protocol: ProtocolConfig,
    /// Implementation/runtime parameters that never reach the wire.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ProtocolConfig {
    #[serde(rename = "TimeoutInterval")]
    /// Seconds between a sent packet and giving up on the peer. The same
    /// bound drives client liveness and server idle reaping. Non-positive
    /// disables the timer entirely.
    pub timeout_interval: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "TickInterval", with = "serde_millis")]
    /// Cadence of the threaded drivers' timeout/reaping checks.
    pub tick_interval: Duration,

    #[serde(rename = "LogLevel")]
    /// Default diagnostic log filter; `RUST_LOG` still wins when set.
    pub log_level: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout_interval: 5.0,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.runtime.tick_interval >= Duration::from_millis(1),
            "TickInterval must be at least 1ms"
        );
        ensure!(
            self.protocol.timeout_interval.is_finite(),
            "TimeoutInterval must be a finite number of seconds"
        );
        Ok(())
    }

    /// The effective timer bound; `None` when the timer is disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.protocol.timeout_interval > 0.0)
            .then(|| Duration::from_secs_f64(self.protocol.timeout_interval))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

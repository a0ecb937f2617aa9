// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

/// Output format for the process logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        }
    }
}

/// Installs the global `tracing` subscriber. Level is driven by `RUST_LOG`
/// (or `info` when unset); format by `LOG_FORMAT=json|plain`.
///
/// Unlike the PDU-level client this crate's conventions are borrowed from,
/// there is no wire-protocol span structure worth reconstructing here, so
/// this intentionally skips the span-field-capture layer and `fastrace`
/// integration — plain `tracing-subscriber` fmt is enough for a worker
/// whose unit of work is "one task".
pub fn init_logger() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to build EnvFilter")?;

    let result = match LogFormat::from_env() {
        LogFormat::Plain => {
            fmt().with_env_filter(env_filter).with_target(true).try_init()
        },
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("failed to install global subscriber: {e}"))
}

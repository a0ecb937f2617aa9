// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use translation_worker::{
    cfg::{cli::ensure_result_dir, config::Config, logger::init_logger},
    engine::Engine,
    registry::RegistryClient,
    resource::ResourceProbe,
    store::StoreClient,
    transcribe::WhisperAdapter,
    translate::TranslationRouter,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    let cfg = Config::load_from_env().context("failed to load configuration")?;
    info!(node_id = %cfg.node_id, host = %cfg.host, port = cfg.port, "starting worker node");

    let result_dir = ensure_result_dir(&cfg.result_dir).context("failed to prepare result directory")?;

    let registry = Arc::new(
        RegistryClient::connect(&cfg)
            .await
            .context("failed to connect to registry")?,
    );
    let store = Arc::new(
        StoreClient::connect(&cfg)
            .await
            .context("failed to connect to persistent store")?,
    );
    let transcriber = Arc::new(WhisperAdapter::new(cfg.whisper_model_size.clone()));
    let translator = Arc::new(TranslationRouter::new(&cfg));
    let resource_probe = Arc::new(ResourceProbe::new());

    let engine = Engine::new(cfg, registry, store, transcriber, translator, resource_probe, result_dir);

    let run_handle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    engine.shutdown().await;

    run_handle.abort();
    Ok(())
}

/// Waits for `SIGINT` or `SIGTERM` (§6's process-signal contract). Falls
/// back to `ctrl_c` alone on platforms without Unix signal support.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

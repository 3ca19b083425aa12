// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vpn_billing_server::api::router;
use vpn_billing_server::auth::InitDataValidator;
use vpn_billing_server::billing::Reconciler;
use vpn_billing_server::config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER};
use vpn_billing_server::providers::{LavaClient, PanelClient, TokenCache};
use vpn_billing_server::state::AppState;
use vpn_billing_server::storage::Ledger;
use vpn_billing_server::sync_worker::PanelSyncWorker;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet.
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn Error>> {
    let ledger_path = config.ledger_path();
    let ledger = Arc::new(Ledger::open(&ledger_path)?);
    info!(path = %ledger_path.display(), "Ledger opened");

    let panel = PanelClient::new(config.panel.clone(), Arc::new(TokenCache::default()))?;
    let payments = LavaClient::new(config.lava.clone())?;
    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        Arc::new(panel),
        Arc::new(payments),
        config.billing.clone(),
    ));
    let validator = InitDataValidator::new(&config.bot_token, config.auth_max_age)?;

    let shutdown = CancellationToken::new();
    let worker = PanelSyncWorker::new(reconciler.clone(), config.sync_interval);
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let app = router(AppState::new(ledger, reconciler, validator));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "VPN billing server listening (docs at /docs)");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Panel sync worker task failed");
    }
    Ok(())
}

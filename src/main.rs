//! Feed Scheduler: binary entrypoint.
//! Loads configuration, starts the orchestrator and, when `OPS_ADDR` is set,
//! the ops HTTP surface. Runs until Ctrl-C / SIGTERM, then drains.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_scheduler::metrics::Metrics;
use feed_scheduler::{create_router, OpsState, Orchestrator, OrchestratorConfig};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_scheduler=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = OrchestratorConfig::load().context("loading configuration")?;
    let ops_addr = config.ops_addr.clone();
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let ops_server = match ops_addr {
        Some(addr) => {
            let metrics = Metrics::init()?;
            let router = create_router(OpsState::new(
                Arc::clone(&orchestrator),
                Some(metrics.handle.clone()),
            ));
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding ops listener on {addr}"))?;
            tracing::info!(%addr, "ops server listening");
            Some(tokio::spawn(async move {
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = stop_rx.wait_for(|stopped| *stopped).await;
                });
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "ops server failed");
                }
            }))
        }
        None => None,
    };

    orchestrator.start().await?;

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    orchestrator.stop().await;
    let _ = stop_tx.send(true);
    if let Some(server) = ops_server {
        let _ = server.await;
    }
    Ok(())
}

//! Circulation HTTP server.
//!
//! Wires the allocation engine, the background expiry sweeper and the Axum
//! router, then serves until Ctrl+C or SIGTERM.

use anyhow::Context;
use circulation_core::environment::SystemClock;
use circulation_engine::metrics::install_recorder;
use circulation_engine::{ExpirySweeper, TracingEmitter};
use circulation_web::{AppState, Config, build_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting circulation server");
    config.validate().context("invalid configuration")?;
    info!(
        hold_hours = config.allocation.hold_hours,
        max_active_reservations = config.allocation.max_active_reservations,
        sweep_interval_secs = config.allocation.sweep_interval_secs,
        "Configuration loaded"
    );

    let mut state = AppState::with_card_registry(
        config.engine_config(),
        Arc::new(SystemClock),
        Arc::new(TracingEmitter),
    );
    let engine = state.engine.clone();
    if config.server.metrics_enabled {
        let handle = install_recorder().context("failed to install metrics recorder")?;
        state = state.with_metrics(handle);
        info!("Prometheus metrics enabled on /metrics");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper = ExpirySweeper::new(engine, config.sweep_interval()).spawn(shutdown_tx.subscribe());

    let app = build_router(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    let grace = Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(grace, async { tokio::join!(server, sweeper) }).await {
        Ok((server, sweeper)) => {
            server.context("server task panicked")?.context("server error")?;
            sweeper.context("sweeper task panicked")?;
            info!("Shutdown complete");
        }
        Err(_) => warn!(timeout_secs = grace.as_secs(), "Shutdown timed out"),
    }
    Ok(())
}

/// Waits for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

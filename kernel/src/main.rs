//! Stackforge control-plane server.
//!
//! Runs the HTTP API and the background workers until a shutdown signal
//! arrives.

use anyhow::Context;
use stackforge_kernel::app::AppState;
use stackforge_kernel::infrastructure::{
    audit, config::Settings, server, telemetry::TelemetryBuilder,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new().context("Failed to load configuration")?;

    let _log_guard = TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION"))
        .init()
        .context("Failed to initialize telemetry")?;
    let metrics = server::install_metrics()?;

    info!("Stackforge Kernel Starting...");
    audit::log_audit(&audit::AuditEvent::SystemStartup {
        component: "Kernel".into(),
    });

    let (state, wakes) = match AppState::from_settings(&config).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to initialize control plane state: {e}");
            return Err(e.into());
        }
    };
    let workers = state
        .spawn_workers(wakes, &config.workers)
        .await
        .context("Failed to start workers")?;

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let app = server::router(state, Some(metrics));
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        server::run_server(&server_config, app, async move {
            server_shutdown.cancelled().await;
        })
        .await
    });

    info!("Stackforge Kernel Initialized. Waiting for shutdown signal...");

    shutdown_signal().await;
    info!("Shutdown signal received, cleaning up...");
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Control Plane failed: {e:?}"),
        Err(e) => error!("Control Plane task panicked: {e}"),
    }
    workers.shutdown().await;

    audit::log_audit(&audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });
    info!("Stackforge Kernel Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

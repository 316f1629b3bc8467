//! Database Watcher binary.
//!
//! Listens for image notifications in PostgreSQL and launches containers.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use db_watcher::docker::{DockerEngine, Launcher};
use db_watcher::postgres::{NotificationListener, NotificationSession, PgSession};
use db_watcher::{Controller, WatcherConfig};

/// Initialize tracing/logging.
///
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,db_watcher=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!("Starting database watcher");

    let config = WatcherConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        channel = %config.notify_channel,
        pull_if_missing = config.pull_if_missing,
        cleanup_on_start_failure = config.cleanup_on_start_failure,
        "Watcher configuration loaded"
    );

    let mut session = PgSession::connect(&config.database_url, config.connect_timeout())
        .await
        .context("failed to create PostgreSQL listener")?;

    let engine = match DockerEngine::connect().await {
        Ok(engine) => engine,
        Err(e) => {
            if let Err(close_err) = session.close().await {
                tracing::warn!(error = %close_err, "Failed to close database session");
            }
            return Err(e).context("failed to initialize Docker launcher");
        }
    };

    let controller = Controller::new(
        NotificationListener::new(session, config.retry_policy()),
        Launcher::new(engine, config.launch_options()),
        config.notify_channel.clone(),
    );

    let running = controller
        .start()
        .await
        .context("failed to start controller")?;

    let stop = running.stop_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        stop.stop();
    });

    let summary = running.join().await?;
    tracing::info!(
        received = summary.received,
        launched = summary.launched,
        failed = summary.failed,
        skipped = summary.skipped,
        "Database watcher exited"
    );

    Ok(())
}

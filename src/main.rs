//! BadgeHarbor binary entry point

use std::sync::Arc;

use badgeharbor::jobs::{Dispatcher, JobRunner};
use badgeharbor::{config, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router and start the HTTP server
/// 5. Start background tasks (job runner, profile refresh)
/// 6. Shut down gracefully on Ctrl-C
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("BADGEHARBOR__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "badgeharbor=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "badgeharbor=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting BadgeHarbor...");

    // 2. Initialize metrics
    badgeharbor::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domains = ?config.federation.domains.iter().map(|d| d.domain.as_str()).collect::<Vec<_>>(),
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = badgeharbor::build_router(state.clone());

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // 7. Start background tasks
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner_handle = spawn_job_runner(state.clone(), shutdown_rx);
    spawn_profile_refresh_task(state.clone());

    // 8. Serve until Ctrl-C, then stop the runner between jobs
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = runner_handle.await {
        tracing::error!(error = %e, "Job runner task panicked");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Spawn the job runner polling loop.
///
/// A job store failure stops the runner: it signals infrastructure trouble
/// and must surface loudly instead of being recorded as job failures.
fn spawn_job_runner(
    state: AppState,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let dispatcher = Arc::new(Dispatcher::new(
        state.db.clone(),
        state.config.clone(),
        state.http_client.clone(),
        state.actor_cache.clone(),
    ));
    let runner = JobRunner::new(state.db.clone(), state.config.clone(), dispatcher);

    tokio::spawn(async move {
        if let Err(e) = runner.run(shutdown).await {
            tracing::error!(error = %e, "Job runner stopped on infrastructure failure");
            std::process::exit(1);
        }
    })
}

/// Spawn the follower profile refresh sweep.
fn spawn_profile_refresh_task(state: AppState) {
    const SWEEP_INTERVAL_SECS: u64 = 6 * 60 * 60;
    const STALE_AFTER_HOURS: i64 = 24;
    const BATCH: i64 = 50;

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        // Consume the immediate first tick so the first sweep waits an interval.
        interval.tick().await;

        loop {
            interval.tick().await;
            state.actor_cache.prune_expired().await;
            if let Err(e) = state
                .refresh_stale_follower_profiles(chrono::Duration::hours(STALE_AFTER_HOURS), BATCH)
                .await
            {
                tracing::error!(error = %e, "Follower profile refresh failed");
            }
        }
    });

    tracing::info!("Profile refresh task spawned");
}

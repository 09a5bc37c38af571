//! MoodMap Fetch Worker
//!
//! Refreshes countries in the background:
//! 1. Takes the shared fetch lock
//! 2. Pulls the stalest country's newest posts
//! 3. Scores their mood
//! 4. Swaps the posts and score in atomically
//!
//! Modes: `run` (default), `once`, `reset-data`, `reset-lock`.

mod runner;

use crate::runner::{FetchRunner, Mode};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use moodmap_common::{
    catalog,
    config::AppConfig,
    db::{DbPool, Repository},
    metrics::{self, FETCH_CYCLE_BUCKETS, METRICS_PREFIX},
    FetchCoordinator, VERSION,
};
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let mode = Mode::parse(args.get(1).map(String::as_str))?;

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }

    info!(mode = ?mode, "Starting MoodMap Fetch Worker v{}", VERSION);

    // Initialize metrics exporter (service mode only)
    if mode == Mode::Service && config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_fetch_cycle_duration_seconds", METRICS_PREFIX)),
                FETCH_CYCLE_BUCKETS,
            )?
            .install()?;
        metrics::register_metrics();
        info!(addr = %addr, "Metrics exporter listening");
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.auto_migrate {
        db.create_tables().await?;
    }

    let repository = Repository::new(db);
    let coordinator = FetchCoordinator::from_config(repository.clone(), &config)?;
    let runner = FetchRunner::new(coordinator, repository.clone(), config.fetch.poll_interval());

    if matches!(mode, Mode::Service | Mode::Once) && config.fetch.seed_catalog {
        catalog::seed_catalog(&repository).await?;
    }

    match mode {
        Mode::Once => {
            let outcome = runner.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Mode::ResetData => {
            let removed = runner.reset_data().await?;
            println!("Deleted {} countries with their posts and ratings", removed);
        }
        Mode::ResetLock => {
            runner.reset_lock().await?;
            println!("Fetch lock reset; next fetch can start immediately");
        }
        Mode::Service => {
            runner
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
    }

    info!("Fetch worker shutting down");
    Ok(())
}

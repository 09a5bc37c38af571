//! Fetch worker runner
//!
//! Drives the coordinator on a timer and implements the maintenance modes.

use chrono::Utc;
use moodmap_common::{db::Repository, errors::AppError, FetchCoordinator, FetchOutcome};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// What the worker was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Tick forever until a shutdown signal
    Service,
    /// Run one step and print the outcome
    Once,
    /// Delete every country, post and rating
    ResetData,
    /// Free a stuck fetch lock
    ResetLock,
}

impl Mode {
    /// Mode from the first command-line argument
    pub fn parse(arg: Option<&str>) -> Result<Self, WorkerError> {
        match arg {
            None | Some("run") => Ok(Mode::Service),
            Some("once") => Ok(Mode::Once),
            Some("reset-data") => Ok(Mode::ResetData),
            Some("reset-lock") => Ok(Mode::ResetLock),
            Some(other) => Err(WorkerError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Unknown mode '{0}' (expected run, once, reset-data or reset-lock)")]
    UnknownMode(String),

    #[error("Fetch step failed: {0}")]
    Step(#[from] AppError),
}

/// Consecutive step errors before the loop backs off
const MAX_FAILURES: u32 = 5;

/// Pause after `MAX_FAILURES` consecutive errors
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

pub struct FetchRunner {
    coordinator: FetchCoordinator,
    repository: Repository,
    poll_interval: Duration,
}

impl FetchRunner {
    pub fn new(coordinator: FetchCoordinator, repository: Repository, poll_interval: Duration) -> Self {
        Self {
            coordinator,
            repository,
            poll_interval,
        }
    }

    /// One coordinator step
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<FetchOutcome, WorkerError> {
        let outcome = self.coordinator.advance_once().await?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Wipe all stored data
    pub async fn reset_data(&self) -> Result<u64, WorkerError> {
        let removed = self.repository.reset_all().await?;
        warn!(countries = removed, "All data deleted");
        Ok(removed)
    }

    /// Free the fetch lock so the next step can start immediately
    pub async fn reset_lock(&self) -> Result<(), WorkerError> {
        self.coordinator.reset_lock(Utc::now()).await?;
        Ok(())
    }

    /// Tick until `shutdown` resolves; returns the number of completed steps
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut steps = 0;
        let mut consecutive_failures = 0;

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Fetch worker ready, starting loop"
        );

        loop {
            // Circuit breaker check
            if consecutive_failures >= MAX_FAILURES {
                warn!(
                    failures = consecutive_failures,
                    "Circuit breaker open, pausing..."
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => {
                            consecutive_failures = 0;
                            steps += 1;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                error = %e,
                                failures = consecutive_failures,
                                "Fetch step failed"
                            );
                        }
                    }
                }
            }
        }

        info!(steps = steps, "Fetch worker loop stopped");
        steps
    }
}

fn log_outcome(outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Success {
            country,
            posts_fetched,
            total_posts,
            emotion_score,
            ..
        } => info!(
            country = %country,
            posts_fetched = posts_fetched,
            total_posts = total_posts,
            emotion_score = emotion_score,
            "Country refreshed"
        ),
        FetchOutcome::Failed { country, error, .. } => {
            warn!(country = %country, error = %error, "Country refresh failed")
        }
        FetchOutcome::RateLimited { wait_time } => {
            info!(wait_time = wait_time, "Fetch rate limited")
        }
        FetchOutcome::AlreadyBusy => info!("Another fetch is in progress"),
        FetchOutcome::NoEntities => info!("No countries to fetch"),
    }
}

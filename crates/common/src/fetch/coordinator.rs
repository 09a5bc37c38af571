//! Fetch coordinator
//!
//! One call to [`FetchCoordinator::advance_once`] refreshes at most one
//! country: take the lock, pick the stalest country, pull its newest posts,
//! score them and swap them in atomically.

use super::lock::{FetchLock, LockDecision};
use super::status::{FetchStatusSnapshot, StatusPublisher};
use crate::config::{AppConfig, FetchConfig};
use crate::content::{create_content_source, ContentFetcher};
use crate::db::models::Country;
use crate::db::Repository;
use crate::errors::{AppError, Result};
use crate::metrics::FetchCycleTimer;
use crate::sentiment::{create_sentiment_api, SentimentScorer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn, Instrument};

/// Result of one coordinator step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Seconds until the next cycle may start
    RateLimited { wait_time: f64 },

    #[serde(rename = "busy")]
    AlreadyBusy,

    #[serde(rename = "no_countries")]
    NoEntities,

    Success {
        country: String,
        subreddit: String,
        posts_fetched: usize,
        total_posts: i32,
        emotion_score: i32,
    },

    #[serde(rename = "error")]
    Failed {
        country: String,
        subreddit: String,
        error: String,
    },
}

impl FetchOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::RateLimited { .. } => "rate_limited",
            FetchOutcome::AlreadyBusy => "busy",
            FetchOutcome::NoEntities => "no_countries",
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::Failed { .. } => "error",
        }
    }

    fn failed(country: &Country, error: impl ToString) -> Self {
        FetchOutcome::Failed {
            country: country.name.clone(),
            subreddit: country.subreddit.clone(),
            error: error.to_string(),
        }
    }
}

/// Drives fetch cycles; cheap to clone and safe to share
#[derive(Clone)]
pub struct FetchCoordinator {
    repo: Repository,
    lock: FetchLock,
    status: StatusPublisher,
    fetcher: ContentFetcher,
    scorer: SentimentScorer,
}

impl FetchCoordinator {
    pub fn new(
        repo: Repository,
        fetcher: ContentFetcher,
        scorer: SentimentScorer,
        config: &FetchConfig,
    ) -> Self {
        Self {
            lock: FetchLock::new(repo.clone(), config.min_interval(), config.stale_after()),
            status: StatusPublisher::new(repo.clone()),
            repo,
            fetcher,
            scorer,
        }
    }

    /// Wire the production content source and sentiment provider
    pub fn from_config(repo: Repository, config: &AppConfig) -> Result<Self> {
        let source = create_content_source(&config.reddit)?;
        let api = create_sentiment_api(&config.sentiment)?;

        Ok(Self::new(
            repo,
            ContentFetcher::new(source, config.fetch.page_size),
            SentimentScorer::new(api),
            &config.fetch,
        ))
    }

    /// Run one step at the current wall-clock time
    pub async fn advance_once(&self) -> Result<FetchOutcome> {
        self.advance_once_at(Utc::now()).await
    }

    /// Run one step as of `now`.
    ///
    /// `Err` only when the lock or the country table cannot be reached;
    /// content, scoring and commit failures come back as `Failed`. Once the
    /// lock is held the cycle runs on its own task, so dropping this future
    /// does not abort it.
    #[instrument(skip(self, now), fields(at = %now))]
    pub async fn advance_once_at(&self, now: DateTime<Utc>) -> Result<FetchOutcome> {
        let timer = FetchCycleTimer::start();

        let guard = match self.lock.try_acquire(now).await? {
            LockDecision::Acquired(guard) => guard,
            LockDecision::RateLimited { wait } => {
                let outcome = FetchOutcome::RateLimited {
                    wait_time: wait.as_secs_f64(),
                };
                timer.finish(outcome.label());
                return Ok(outcome);
            }
            LockDecision::AlreadyBusy => {
                timer.finish(FetchOutcome::AlreadyBusy.label());
                return Ok(FetchOutcome::AlreadyBusy);
            }
        };

        // A started cycle runs to completion even if the caller goes away
        let cycle = self.clone();
        let task = tokio::spawn(
            async move {
                let result = cycle.run_cycle(now).await;
                if let Err(e) = guard.release().await {
                    error!(error = %e, "Failed to release fetch lock; it stays held until stale");
                }
                result
            }
            .in_current_span(),
        );

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal {
                message: format!("fetch cycle task failed: {}", e),
            }),
        };

        match result {
            Ok(outcome) => {
                timer.finish(outcome.label());
                Ok(outcome)
            }
            Err(e) => {
                timer.finish("error");
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<FetchOutcome> {
        let Some(country) = self.repo.next_stale_country().await? else {
            info!("No countries to fetch");
            return Ok(FetchOutcome::NoEntities);
        };

        self.status
            .publish_started(&country.name, &country.subreddit, now)
            .await;

        let outcome = self.refresh(&country, now).await;

        self.status.publish_idle(now).await;

        Ok(outcome)
    }

    #[instrument(skip(self, country, now), fields(country = %country.name, subreddit = %country.subreddit))]
    async fn refresh(&self, country: &Country, now: DateTime<Utc>) -> FetchOutcome {
        let posts = match self.fetcher.fetch(&country.subreddit).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(error = %e, "Content fetch failed");
                // Staleness advances on failure too
                if let Err(bump) = self.repo.mark_refreshed(country.id, now).await {
                    error!(error = %bump, "Failed to bump country after fetch failure");
                }
                return FetchOutcome::failed(country, e);
            }
        };

        crate::metrics::record_posts_fetched(&country.name, posts.len());

        let titles: Vec<String> = posts.iter().map(|p| p.title.clone()).collect();
        let score = self.scorer.score(&titles, &country.name).await;

        match self.repo.replace_posts(country.id, &posts, score, now).await {
            Ok(summary) => {
                info!(
                    posts_fetched = posts.len(),
                    inserted = summary.inserted,
                    skipped = summary.skipped,
                    emotion_score = score,
                    "Country refreshed"
                );
                FetchOutcome::Success {
                    country: country.name.clone(),
                    subreddit: country.subreddit.clone(),
                    posts_fetched: posts.len(),
                    total_posts: summary.country.post_count,
                    emotion_score: summary.country.emotion_score,
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to store refreshed posts");
                FetchOutcome::failed(country, e)
            }
        }
    }

    /// Latest published progress
    pub async fn status(&self) -> Result<FetchStatusSnapshot> {
        self.status.current().await
    }

    /// Free a stuck lock so the next step at `now` can run, and reset status
    pub async fn reset_lock(&self, now: DateTime<Utc>) -> Result<()> {
        self.lock.reset(now).await?;
        self.status.reset(now).await?;
        warn!("Fetch lock reset");
        Ok(())
    }
}

//! User mood ratings
//!
//! Visitors rate a country 1-10. One IP keeps one effective rating per
//! country inside the rolling window; resubmitting overwrites it.

use crate::config::RatingsConfig;
use crate::db::{chrono_duration, RatingWrite, Repository};
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Accepted rating range
pub const RATING_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

/// Aggregate of the effective ratings of one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    /// Mean rating, absent when nobody rated inside the window
    pub average: Option<f64>,
    pub count: u64,
}

/// Result of a rating submission
#[derive(Debug, Clone, PartialEq)]
pub enum RatingOutcome {
    Recorded { updated: bool, summary: RatingSummary },
    RateLimited { wait: Duration },
}

#[derive(Clone)]
pub struct RatingService {
    repo: Repository,
    min_interval: Duration,
    window: Duration,
}

impl RatingService {
    pub fn new(repo: Repository, config: &RatingsConfig) -> Self {
        Self {
            repo,
            min_interval: config.min_interval(),
            window: config.window(),
        }
    }

    /// Record `rating` for `country_name` from `ip` at `now`
    pub async fn record_rating(
        &self,
        country_name: &str,
        rating: i64,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<RatingOutcome> {
        if !RATING_RANGE.contains(&rating) {
            metrics::record_rating("invalid");
            return Err(AppError::InvalidRating { value: rating });
        }

        let country = self
            .repo
            .find_country_by_name(country_name)
            .await?
            .ok_or_else(|| AppError::CountryNotFound {
                name: country_name.to_string(),
            })?;

        let write = self
            .repo
            .record_rating_in_window(
                country.id,
                ip,
                rating as i32,
                now,
                self.min_interval,
                self.window,
            )
            .await?;

        match write {
            RatingWrite::Throttled { wait } => {
                metrics::record_rating("rate_limited");
                tracing::debug!(ip = ip, wait_ms = wait.as_millis() as u64, "Rating throttled");
                Ok(RatingOutcome::RateLimited { wait })
            }
            RatingWrite::Written { updated } => {
                metrics::record_rating(if updated { "updated" } else { "recorded" });
                let summary = self.summary(country.id, now).await?;
                tracing::info!(
                    country = %country.name,
                    rating = rating,
                    updated = updated,
                    "Mood rating stored"
                );
                Ok(RatingOutcome::Recorded { updated, summary })
            }
        }
    }

    /// Average and count of the ratings effective at `now`
    pub async fn summary(&self, country_id: Uuid, now: DateTime<Utc>) -> Result<RatingSummary> {
        let since = now - chrono_duration(self.window);
        let rows = self.repo.ratings_since(country_id, since).await?;

        // Newest first: only the latest rating per IP counts
        let mut seen = HashSet::new();
        let scores: Vec<i32> = rows
            .into_iter()
            .filter(|r| seen.insert(r.ip_address.clone()))
            .map(|r| r.mood_score)
            .collect();

        let count = scores.len() as u64;
        let average = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().map(|&s| s as f64).sum::<f64>() / scores.len() as f64)
        };

        Ok(RatingSummary { average, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    async fn service() -> (Repository, RatingService, Uuid) {
        let repo = Repository::new(memory_pool().await);
        let country = repo.upsert_country_by_name("Wakanda", "wakanda").await.unwrap();
        let service = RatingService::new(repo.clone(), &RatingsConfig::default());
        (repo, service, country.id)
    }

    #[tokio::test]
    async fn out_of_range_is_rejected_without_writes() {
        let (repo, service, id) = service().await;

        for bad in [0, 11, 12, -1] {
            let err = service
                .record_rating("Wakanda", bad, "10.0.0.1", at(0))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidRating { value } if value == bad));
        }
        assert_eq!(repo.count_ratings(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_country_is_not_found() {
        let (_repo, service, _id) = service().await;
        let err = assert_err!(service.record_rating("Atlantis", 5, "10.0.0.1", at(0)).await);
        assert!(matches!(err, AppError::CountryNotFound { .. }));
    }

    #[tokio::test]
    async fn resubmission_inside_window_overwrites() {
        let (repo, service, id) = service().await;

        let first = service.record_rating("Wakanda", 4, "10.0.0.1", at(0)).await.unwrap();
        assert_eq!(
            first,
            RatingOutcome::Recorded {
                updated: false,
                summary: RatingSummary { average: Some(4.0), count: 1 },
            }
        );

        let second = service
            .record_rating("Wakanda", 9, "10.0.0.1", at(3600))
            .await
            .unwrap();
        assert_eq!(
            second,
            RatingOutcome::Recorded {
                updated: true,
                summary: RatingSummary { average: Some(9.0), count: 1 },
            }
        );
        assert_eq!(repo.count_ratings(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_ip_is_throttled() {
        let (repo, service, id) = service().await;
        repo.upsert_country_by_name("Chad", "Chad").await.unwrap();

        assert_ok!(service.record_rating("Wakanda", 6, "10.0.0.1", at(0)).await);

        // Throttle applies across countries
        let outcome = service.record_rating("Chad", 6, "10.0.0.1", at(2)).await.unwrap();
        assert_eq!(
            outcome,
            RatingOutcome::RateLimited { wait: Duration::from_secs(3) }
        );

        // Another IP is unaffected
        let other = service.record_rating("Wakanda", 2, "10.0.0.2", at(2)).await.unwrap();
        match other {
            RatingOutcome::Recorded { summary, .. } => {
                assert_eq!(summary.count, 2);
                assert_eq!(summary.average, Some(4.0));
            }
            RatingOutcome::RateLimited { .. } => panic!("different IP must not be throttled"),
        }
        assert_eq!(repo.count_ratings(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resubmission_after_window_appends() {
        let (repo, service, id) = service().await;

        service.record_rating("Wakanda", 3, "10.0.0.1", at(0)).await.unwrap();
        let later = service
            .record_rating("Wakanda", 8, "10.0.0.1", at(25 * 3600))
            .await
            .unwrap();

        assert_eq!(
            later,
            RatingOutcome::Recorded {
                updated: false,
                summary: RatingSummary { average: Some(8.0), count: 1 },
            }
        );
        assert_eq!(repo.count_ratings(id).await.unwrap(), 2);
    }
}

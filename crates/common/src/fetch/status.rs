//! Advisory fetch progress for pollers

use crate::db::models::FetchStatusRow;
use crate::db::Repository;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Label shown while no cycle has run or after a reset
pub const READY_LABEL: &str = "Ready";

/// What the fetch loop is doing, as last published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStatusSnapshot {
    pub current_country: String,
    pub current_subreddit: String,
    pub is_fetching: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for FetchStatusSnapshot {
    fn default() -> Self {
        Self {
            current_country: READY_LABEL.to_string(),
            current_subreddit: String::new(),
            is_fetching: false,
            last_updated: None,
        }
    }
}

impl From<FetchStatusRow> for FetchStatusSnapshot {
    fn from(row: FetchStatusRow) -> Self {
        Self {
            current_country: row.current_country,
            current_subreddit: row.current_subreddit,
            is_fetching: row.is_fetching,
            last_updated: Some(row.last_updated),
        }
    }
}

/// Writes the status row.
///
/// Publishing never fails a cycle: errors are logged and dropped.
#[derive(Clone)]
pub struct StatusPublisher {
    repo: Repository,
}

impl StatusPublisher {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// A cycle started working on `country`
    pub async fn publish_started(&self, country: &str, subreddit: &str, now: DateTime<Utc>) {
        if let Err(e) = self.repo.upsert_fetch_status(country, subreddit, true, now).await {
            warn!(country = country, error = %e, "Failed to publish fetch status");
        }
    }

    /// The current cycle finished
    pub async fn publish_idle(&self, now: DateTime<Utc>) {
        if let Err(e) = self.repo.mark_fetch_status_idle(now).await {
            warn!(error = %e, "Failed to publish idle fetch status");
        }
    }

    /// Back to the initial "Ready" state
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<()> {
        self.repo.upsert_fetch_status(READY_LABEL, "", false, now).await
    }

    /// Latest published status, or the initial state if none
    pub async fn current(&self) -> Result<FetchStatusSnapshot> {
        Ok(self
            .repo
            .find_fetch_status()
            .await?
            .map(FetchStatusSnapshot::from)
            .unwrap_or_default())
    }
}

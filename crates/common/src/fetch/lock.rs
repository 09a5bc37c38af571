//! Cross-process fetch lock
//!
//! A single database row guards the fetch cycle. Every acquisition is a
//! conditional UPDATE, so the database decides the winner even when many
//! gateway and worker processes race for it.

use crate::db::Repository;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, warn};

/// Result of one acquisition attempt
#[derive(Debug)]
pub enum LockDecision {
    /// The caller holds the lock until the guard is released or dropped
    Acquired(FetchLockGuard),
    /// The previous cycle started less than the minimum interval ago
    RateLimited { wait: Duration },
    /// Another holder is mid-cycle and not yet presumed dead
    AlreadyBusy,
}

impl LockDecision {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockDecision::Acquired(_))
    }
}

/// Database-backed mutual exclusion with a start-rate limit
#[derive(Clone)]
pub struct FetchLock {
    repo: Repository,
    min_interval: Duration,
    stale_after: Duration,
}

impl FetchLock {
    pub fn new(repo: Repository, min_interval: Duration, stale_after: Duration) -> Self {
        Self {
            repo,
            min_interval,
            stale_after,
        }
    }

    /// Try to take the lock at `now`.
    ///
    /// The rate limit is checked before busyness, so a just-started holder
    /// is reported as `RateLimited`.
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LockDecision> {
        self.repo.ensure_fetch_lock().await?;

        let now_ms = now.timestamp_millis();
        let min_ms = millis(self.min_interval);
        let stale_ms = millis(self.stale_after);

        if self.repo.try_claim_free_lock(now_ms, min_ms).await? {
            return Ok(LockDecision::Acquired(self.guard()));
        }

        if self.repo.try_claim_stale_lock(now_ms, min_ms, stale_ms).await? {
            warn!(
                stale_after_secs = self.stale_after.as_secs(),
                "Recovered fetch lock from a holder presumed dead"
            );
            return Ok(LockDecision::Acquired(self.guard()));
        }

        let row = self
            .repo
            .find_fetch_lock()
            .await?
            .ok_or_else(|| AppError::Internal {
                message: "fetch lock row missing".to_string(),
            })?;

        let elapsed_ms = now_ms - row.last_started_at_ms;
        if elapsed_ms < min_ms {
            let wait_ms = (min_ms - elapsed_ms).min(min_ms);
            return Ok(LockDecision::RateLimited {
                wait: Duration::from_millis(wait_ms as u64),
            });
        }

        Ok(LockDecision::AlreadyBusy)
    }

    /// Mark the lock free regardless of who holds it
    pub async fn release(&self) -> Result<()> {
        self.repo.release_fetch_lock().await
    }

    /// Free the lock and backdate it so the next attempt at `now` succeeds
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<()> {
        let backdated = now.timestamp_millis() - millis(self.min_interval);
        self.repo.reset_fetch_lock(backdated).await
    }

    fn guard(&self) -> FetchLockGuard {
        FetchLockGuard {
            repo: Some(self.repo.clone()),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Held fetch lock.
///
/// Call [`FetchLockGuard::release`] when done. A guard dropped without
/// release (panic, cancelled future) frees the lock from a spawned task.
#[must_use = "the fetch lock is held until the guard is released"]
pub struct FetchLockGuard {
    repo: Option<Repository>,
}

impl FetchLockGuard {
    /// Free the lock
    pub async fn release(mut self) -> Result<()> {
        match self.repo.take() {
            Some(repo) => repo.release_fetch_lock().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for FetchLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchLockGuard")
            .field("held", &self.repo.is_some())
            .finish()
    }
}

impl Drop for FetchLockGuard {
    fn drop(&mut self) {
        let Some(repo) = self.repo.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Fetch lock guard dropped while held, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = repo.release_fetch_lock().await {
                        error!(error = %e, "Background fetch lock release failed");
                    }
                });
            }
            Err(_) => {
                error!("Fetch lock guard dropped outside a runtime; lock stays held until stale");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{file_pool, memory_pool};
    use chrono::TimeZone;
    use futures::future::join_all;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_760_000_000_000 + ms).unwrap()
    }

    async fn lock() -> (Repository, FetchLock) {
        let repo = Repository::new(memory_pool().await);
        let lock = FetchLock::new(repo.clone(), Duration::from_secs(2), Duration::from_secs(120));
        (repo, lock)
    }

    #[tokio::test]
    async fn fresh_lock_is_acquired() {
        let (repo, lock) = lock().await;

        let decision = lock.try_acquire(at_ms(0)).await.unwrap();
        assert!(decision.is_acquired());

        let row = repo.find_fetch_lock().await.unwrap().unwrap();
        assert!(row.busy);
        assert_eq!(row.last_started_at_ms, at_ms(0).timestamp_millis());

        if let LockDecision::Acquired(guard) = decision {
            guard.release().await.unwrap();
        }
        assert!(!repo.find_fetch_lock().await.unwrap().unwrap().busy);
    }

    #[tokio::test]
    async fn rate_limit_wins_over_busy() {
        let (_repo, lock) = lock().await;

        let first = lock.try_acquire(at_ms(0)).await.unwrap();
        assert!(first.is_acquired());

        match lock.try_acquire(at_ms(500)).await.unwrap() {
            LockDecision::RateLimited { wait } => assert_eq!(wait, Duration::from_millis(1500)),
            other => panic!("expected rate limit, got {:?}", other),
        }

        // Past the interval but still held
        assert!(matches!(
            lock.try_acquire(at_ms(3_000)).await.unwrap(),
            LockDecision::AlreadyBusy
        ));

        drop(first);
    }

    #[tokio::test]
    async fn released_lock_is_rate_limited_then_free() {
        let (_repo, lock) = lock().await;

        if let LockDecision::Acquired(guard) = lock.try_acquire(at_ms(0)).await.unwrap() {
            guard.release().await.unwrap();
        } else {
            panic!("expected acquisition");
        }

        assert!(matches!(
            lock.try_acquire(at_ms(1_000)).await.unwrap(),
            LockDecision::RateLimited { .. }
        ));
        assert!(lock.try_acquire(at_ms(2_000)).await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn stale_holder_is_taken_over() {
        let (repo, lock) = lock().await;

        let abandoned = lock.try_acquire(at_ms(0)).await.unwrap();
        assert!(abandoned.is_acquired());
        // Simulate a crashed process: the guard never runs its release
        std::mem::forget(abandoned);

        assert!(matches!(
            lock.try_acquire(at_ms(120_000)).await.unwrap(),
            LockDecision::AlreadyBusy
        ));

        let recovered = lock.try_acquire(at_ms(120_001)).await.unwrap();
        assert!(recovered.is_acquired());
        let row = repo.find_fetch_lock().await.unwrap().unwrap();
        assert_eq!(row.last_started_at_ms, at_ms(120_001).timestamp_millis());
        assert!(row.busy);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_have_one_winner() {
        let (pool, _dir) = file_pool(8).await;
        let repo = Repository::new(pool);
        let lock = FetchLock::new(repo.clone(), Duration::from_secs(2), Duration::from_secs(120));
        repo.ensure_fetch_lock().await.unwrap();
        let now = at_ms(0);

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                tokio::spawn(async move { lock.try_acquire(now).await.unwrap() })
            })
            .collect();
        let decisions: Vec<LockDecision> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = decisions.iter().filter(|d| d.is_acquired()).count();
        assert_eq!(winners, 1);
        assert!(decisions.iter().all(|d| matches!(
            d,
            LockDecision::Acquired(_) | LockDecision::RateLimited { .. } | LockDecision::AlreadyBusy
        )));

        let row = repo.find_fetch_lock().await.unwrap().unwrap();
        assert!(row.busy);
        assert_eq!(row.last_started_at_ms, now.timestamp_millis());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let (repo, lock) = lock().await;

        let decision = lock.try_acquire(at_ms(0)).await.unwrap();
        drop(decision);

        for _ in 0..50 {
            if !repo.find_fetch_lock().await.unwrap().unwrap().busy {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lock still held after guard drop");
    }

    #[tokio::test]
    async fn reset_makes_lock_available_now() {
        let (_repo, lock) = lock().await;

        let held = lock.try_acquire(at_ms(0)).await.unwrap();
        std::mem::forget(held);

        lock.reset(at_ms(100)).await.unwrap();
        assert!(lock.try_acquire(at_ms(100)).await.unwrap().is_acquired());
    }
}

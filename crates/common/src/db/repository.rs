//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::content::SourcePost;
use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    AccessMode, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of an atomic post replacement
#[derive(Debug, Clone)]
pub struct ReplaceSummary {
    /// Country row as committed
    pub country: Country,
    /// Posts written for this country
    pub inserted: usize,
    /// Posts dropped as in-batch duplicates or owned by another country
    pub skipped: usize,
}

/// Country plus its newest posts, read from one consistent snapshot
#[derive(Debug, Clone)]
pub struct CountrySnapshotRows {
    pub country: Country,
    pub posts: Vec<Post>,
}

/// What a rating submission did to the store
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatingWrite {
    /// The same IP submitted too recently; nothing written
    Throttled { wait: Duration },
    /// Rating stored; `updated` when an in-window rating was overwritten
    Written { updated: bool },
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Country Operations
    // ========================================================================

    /// Get a country by name, creating it with the given subreddit if missing.
    ///
    /// Concurrent callers racing on the same name all end up with the same row.
    pub async fn upsert_country_by_name(&self, name: &str, subreddit: &str) -> Result<Country> {
        if let Some(existing) = self.find_country_on(self.write_conn(), name).await? {
            return Ok(existing);
        }

        let country = CountryActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            subreddit: Set(subreddit.to_string()),
            last_updated: Set(None),
            post_count: Set(0),
            emotion_score: Set(NEUTRAL_SCORE),
        };

        let inserted = CountryEntity::insert(country)
            .on_conflict(
                OnConflict::column(CountryColumn::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await;

        match inserted {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e.into()),
        }

        self.find_country_on(self.write_conn(), name)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("country '{}' vanished after upsert", name),
            })
    }

    /// Find country by its unique name
    pub async fn find_country_by_name(&self, name: &str) -> Result<Option<Country>> {
        self.find_country_on(self.read_conn(), name).await
    }

    async fn find_country_on(
        &self,
        conn: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<Country>> {
        CountryEntity::find()
            .filter(CountryColumn::Name.eq(name))
            .one(conn)
            .await
            .map_err(Into::into)
    }

    /// All countries, alphabetically
    pub async fn list_countries(&self) -> Result<Vec<Country>> {
        CountryEntity::find()
            .order_by_asc(CountryColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// The least recently refreshed country; never-fetched countries first,
    /// ties broken by name.
    pub async fn next_stale_country(&self) -> Result<Option<Country>> {
        // NULL placement differs between backends, so sort on IS NOT NULL
        // explicitly: false (never fetched) comes first everywhere.
        CountryEntity::find()
            .order_by_asc(Expr::col(CountryColumn::LastUpdated).is_not_null())
            .order_by_asc(CountryColumn::LastUpdated)
            .order_by_asc(CountryColumn::Name)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Advance a country's staleness timestamp without touching its posts
    pub async fn mark_refreshed(&self, country_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        CountryEntity::update_many()
            .col_expr(CountryColumn::LastUpdated, Expr::value(now))
            .filter(CountryColumn::Id.eq(country_id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Swap a country's whole post set for `posts` and record the new score,
    /// in one transaction.
    ///
    /// Readers see either the previous set or the new one. Repeated external
    /// ids inside the batch keep their first occurrence; ids owned by another
    /// country are skipped.
    pub async fn replace_posts(
        &self,
        country_id: Uuid,
        posts: &[SourcePost],
        emotion_score: i32,
        now: DateTime<Utc>,
    ) -> Result<ReplaceSummary> {
        let txn = self.write_conn().begin().await?;

        let country = CountryEntity::find_by_id(country_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "country".to_string(),
                id: country_id.to_string(),
            })?;

        PostEntity::delete_many()
            .filter(PostColumn::CountryId.eq(country_id))
            .exec(&txn)
            .await?;

        let mut seen = HashSet::new();
        let unique: Vec<&SourcePost> = posts
            .iter()
            .filter(|p| seen.insert(p.external_id.as_str()))
            .collect();

        // Anything still present after the delete belongs to another country
        let taken: HashSet<String> = if unique.is_empty() {
            HashSet::new()
        } else {
            PostEntity::find()
                .select_only()
                .column(PostColumn::RedditId)
                .filter(PostColumn::RedditId.is_in(unique.iter().map(|p| p.external_id.clone())))
                .into_tuple::<String>()
                .all(&txn)
                .await?
                .into_iter()
                .collect()
        };

        let rows: Vec<PostActiveModel> = unique
            .into_iter()
            .filter(|p| !taken.contains(&p.external_id))
            .map(|p| PostActiveModel {
                id: Set(Uuid::new_v4()),
                country_id: Set(country_id),
                title: Set(p.title.clone()),
                permalink: Set(p.permalink.clone()),
                score: Set(p.score),
                num_comments: Set(p.comment_count),
                author: Set(p.author.clone()),
                created_utc: Set(p.created_at),
                reddit_id: Set(p.external_id.clone()),
                fetched_at: Set(now),
            })
            .collect();

        let inserted = rows.len();
        if !rows.is_empty() {
            PostEntity::insert_many(rows).exec(&txn).await?;
        }

        let mut active: CountryActiveModel = country.into();
        active.last_updated = Set(Some(now));
        active.post_count = Set(inserted as i32);
        active.emotion_score = Set(emotion_score);
        let country = active.update(&txn).await?;

        txn.commit().await?;

        Ok(ReplaceSummary {
            country,
            inserted,
            skipped: posts.len() - inserted,
        })
    }

    /// Newest posts of a country, most recent first
    pub async fn recent_posts(&self, country_id: Uuid, limit: u64) -> Result<Vec<Post>> {
        PostEntity::find()
            .filter(PostColumn::CountryId.eq(country_id))
            .order_by_desc(PostColumn::CreatedUtc)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Number of posts actually stored for a country
    pub async fn count_posts(&self, country_id: Uuid) -> Result<u64> {
        PostEntity::find()
            .filter(PostColumn::CountryId.eq(country_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Country row and newest posts read inside a single transaction
    pub async fn country_snapshot(
        &self,
        name: &str,
        post_limit: u64,
    ) -> Result<Option<CountrySnapshotRows>> {
        let conn = self.read_conn();
        let txn = match conn.get_database_backend() {
            DbBackend::Postgres => {
                conn.begin_with_config(
                    Some(IsolationLevel::RepeatableRead),
                    Some(AccessMode::ReadOnly),
                )
                .await?
            }
            _ => conn.begin().await?,
        };

        let Some(country) = CountryEntity::find()
            .filter(CountryColumn::Name.eq(name))
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let posts = PostEntity::find()
            .filter(PostColumn::CountryId.eq(country.id))
            .order_by_desc(PostColumn::CreatedUtc)
            .limit(post_limit)
            .all(&txn)
            .await?;

        txn.commit().await?;

        Ok(Some(CountrySnapshotRows { country, posts }))
    }

    // ========================================================================
    // Fetch Lock Operations
    // ========================================================================

    /// Create the lock row if it does not exist yet
    pub async fn ensure_fetch_lock(&self) -> Result<()> {
        let row = FetchLockActiveModel {
            id: Set(LOCK_ROW_ID),
            busy: Set(false),
            last_started_at_ms: Set(0),
        };

        let inserted = FetchLockEntity::insert(row)
            .on_conflict(
                OnConflict::column(FetchLockColumn::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await;

        match inserted {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare-and-set a free lock to held.
    ///
    /// Matches only when the lock is free and its last start is at least
    /// `min_interval_ms` old. Returns whether this caller won.
    pub async fn try_claim_free_lock(&self, now_ms: i64, min_interval_ms: i64) -> Result<bool> {
        let result = FetchLockEntity::update_many()
            .col_expr(FetchLockColumn::Busy, Expr::value(true))
            .col_expr(FetchLockColumn::LastStartedAtMs, Expr::value(now_ms))
            .filter(FetchLockColumn::Id.eq(LOCK_ROW_ID))
            .filter(FetchLockColumn::Busy.eq(false))
            .filter(FetchLockColumn::LastStartedAtMs.lte(now_ms - min_interval_ms))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Compare-and-set a held lock whose holder is presumed dead.
    ///
    /// Matches only when the lock is held and its last start is more than
    /// `stale_after_ms` old (and at least `min_interval_ms` old).
    pub async fn try_claim_stale_lock(
        &self,
        now_ms: i64,
        min_interval_ms: i64,
        stale_after_ms: i64,
    ) -> Result<bool> {
        let result = FetchLockEntity::update_many()
            .col_expr(FetchLockColumn::Busy, Expr::value(true))
            .col_expr(FetchLockColumn::LastStartedAtMs, Expr::value(now_ms))
            .filter(FetchLockColumn::Id.eq(LOCK_ROW_ID))
            .filter(FetchLockColumn::Busy.eq(true))
            .filter(FetchLockColumn::LastStartedAtMs.lt(now_ms - stale_after_ms))
            .filter(FetchLockColumn::LastStartedAtMs.lte(now_ms - min_interval_ms))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Current lock row
    pub async fn find_fetch_lock(&self) -> Result<Option<FetchLockRow>> {
        FetchLockEntity::find_by_id(LOCK_ROW_ID)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Mark the lock free; `last_started_at_ms` is left alone
    pub async fn release_fetch_lock(&self) -> Result<()> {
        FetchLockEntity::update_many()
            .col_expr(FetchLockColumn::Busy, Expr::value(false))
            .filter(FetchLockColumn::Id.eq(LOCK_ROW_ID))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    /// Force the lock free and backdate its last start
    pub async fn reset_fetch_lock(&self, last_started_at_ms: i64) -> Result<()> {
        self.ensure_fetch_lock().await?;

        FetchLockEntity::update_many()
            .col_expr(FetchLockColumn::Busy, Expr::value(false))
            .col_expr(FetchLockColumn::LastStartedAtMs, Expr::value(last_started_at_ms))
            .filter(FetchLockColumn::Id.eq(LOCK_ROW_ID))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Fetch Status Operations
    // ========================================================================

    /// Overwrite the status row
    pub async fn upsert_fetch_status(
        &self,
        current_country: &str,
        current_subreddit: &str,
        is_fetching: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let row = FetchStatusActiveModel {
            id: Set(STATUS_ROW_ID),
            current_country: Set(current_country.to_string()),
            current_subreddit: Set(current_subreddit.to_string()),
            is_fetching: Set(is_fetching),
            last_updated: Set(now),
        };

        FetchStatusEntity::insert(row)
            .on_conflict(
                OnConflict::column(FetchStatusColumn::Id)
                    .update_columns([
                        FetchStatusColumn::CurrentCountry,
                        FetchStatusColumn::CurrentSubreddit,
                        FetchStatusColumn::IsFetching,
                        FetchStatusColumn::LastUpdated,
                    ])
                    .to_owned(),
            )
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    /// Flip the status row to idle, keeping the last country visible
    pub async fn mark_fetch_status_idle(&self, now: DateTime<Utc>) -> Result<()> {
        FetchStatusEntity::update_many()
            .col_expr(FetchStatusColumn::IsFetching, Expr::value(false))
            .col_expr(FetchStatusColumn::LastUpdated, Expr::value(now))
            .filter(FetchStatusColumn::Id.eq(STATUS_ROW_ID))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    /// Current status row
    pub async fn find_fetch_status(&self) -> Result<Option<FetchStatusRow>> {
        FetchStatusEntity::find_by_id(STATUS_ROW_ID)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // User Mood Operations
    // ========================================================================

    /// Store a rating under the per-IP throttle and the overwrite window.
    ///
    /// Within one transaction: refuse if `ip` submitted anything less than
    /// `min_interval` ago, otherwise overwrite this IP's rating for the
    /// country from the last `window`, or insert a new one.
    pub async fn record_rating_in_window(
        &self,
        country_id: Uuid,
        ip: &str,
        mood_score: i32,
        now: DateTime<Utc>,
        min_interval: Duration,
        window: Duration,
    ) -> Result<RatingWrite> {
        let txn = self.write_conn().begin().await?;

        // Same-IP submissions queue here until the holder commits. SQLite
        // already admits a single writer; a loser's upgrade fails instead.
        if txn.get_database_backend() == DbBackend::Postgres {
            txn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT pg_advisory_xact_lock(hashtext($1))",
                [ip.into()],
            ))
            .await?;
        }

        let last = UserMoodEntity::find()
            .filter(UserMoodColumn::IpAddress.eq(ip))
            .order_by_desc(UserMoodColumn::SubmittedAt)
            .one(&txn)
            .await?;

        if let Some(last) = last {
            let min_ms = min_interval.as_millis() as i64;
            let since_ms = (now - last.submitted_at).num_milliseconds();
            if since_ms < min_ms {
                let wait_ms = (min_ms - since_ms).clamp(0, min_ms) as u64;
                return Ok(RatingWrite::Throttled {
                    wait: Duration::from_millis(wait_ms),
                });
            }
        }

        let window_start = now - chrono_duration(window);
        let existing = UserMoodEntity::find()
            .filter(UserMoodColumn::CountryId.eq(country_id))
            .filter(UserMoodColumn::IpAddress.eq(ip))
            .filter(UserMoodColumn::SubmittedAt.gt(window_start))
            .order_by_desc(UserMoodColumn::SubmittedAt)
            .one(&txn)
            .await?;

        let updated = match existing {
            Some(row) => {
                let mut active: UserMoodActiveModel = row.into();
                active.mood_score = Set(mood_score);
                active.submitted_at = Set(now);
                active.update(&txn).await?;
                true
            }
            None => {
                UserMoodActiveModel {
                    id: Set(Uuid::new_v4()),
                    country_id: Set(country_id),
                    mood_score: Set(mood_score),
                    ip_address: Set(ip.to_string()),
                    submitted_at: Set(now),
                }
                .insert(&txn)
                .await?;
                false
            }
        };

        txn.commit().await?;
        Ok(RatingWrite::Written { updated })
    }

    /// Ratings of a country submitted after `since`
    pub async fn ratings_since(&self, country_id: Uuid, since: DateTime<Utc>) -> Result<Vec<UserMood>> {
        UserMoodEntity::find()
            .filter(UserMoodColumn::CountryId.eq(country_id))
            .filter(UserMoodColumn::SubmittedAt.gt(since))
            .order_by_desc(UserMoodColumn::SubmittedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Every stored rating of a country, regardless of age
    pub async fn count_ratings(&self, country_id: Uuid) -> Result<u64> {
        UserMoodEntity::find()
            .filter(UserMoodColumn::CountryId.eq(country_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every country, post, rating and the lock/status rows
    pub async fn reset_all(&self) -> Result<u64> {
        let txn = self.write_conn().begin().await?;

        PostEntity::delete_many().exec(&txn).await?;
        UserMoodEntity::delete_many().exec(&txn).await?;
        let countries = CountryEntity::delete_many().exec(&txn).await?;
        FetchLockEntity::delete_many().exec(&txn).await?;
        FetchStatusEntity::delete_many().exec(&txn).await?;

        txn.commit().await?;
        Ok(countries.rows_affected)
    }
}

pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

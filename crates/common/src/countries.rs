//! Read-side views of countries for the map

use crate::catalog::{region_for, subreddit_for};
use crate::db::models::{Country, Post, NEUTRAL_SCORE};
use crate::db::Repository;
use crate::errors::Result;
use crate::ratings::{RatingService, RatingSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Posts included in a snapshot
pub const SNAPSHOT_POST_LIMIT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub title: String,
    pub author: String,
    pub score: i32,
    pub num_comments: i32,
    pub permalink: String,
    pub created_utc: DateTime<Utc>,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            title: post.title,
            author: post.author,
            score: post.score,
            num_comments: post.num_comments,
            permalink: post.permalink,
            created_utc: post.created_utc,
        }
    }
}

/// One country as shown on its detail page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySnapshot {
    pub name: String,
    pub region: Option<String>,
    pub subreddit: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub post_count: i32,
    pub emotion_score: i32,
    pub posts: Vec<PostView>,
    pub user_mood_average: Option<f64>,
    pub user_mood_count: u64,
}

impl CountrySnapshot {
    /// Stand-in for a country that is not stored yet
    fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            region: region_for(name).map(str::to_string),
            subreddit: subreddit_for(name),
            last_updated: None,
            post_count: 0,
            emotion_score: NEUTRAL_SCORE,
            posts: Vec::new(),
            user_mood_average: None,
            user_mood_count: 0,
        }
    }
}

/// One map marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySummary {
    pub name: String,
    pub region: Option<String>,
    pub subreddit: String,
    pub emotion_score: i32,
    pub post_count: i32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<Country> for CountrySummary {
    fn from(country: Country) -> Self {
        Self {
            region: region_for(&country.name).map(str::to_string),
            name: country.name,
            subreddit: country.subreddit,
            emotion_score: country.emotion_score,
            post_count: country.post_count,
            last_updated: country.last_updated,
        }
    }
}

#[derive(Clone)]
pub struct CountryService {
    repo: Repository,
    ratings: RatingService,
}

impl CountryService {
    pub fn new(repo: Repository, ratings: RatingService) -> Self {
        Self { repo, ratings }
    }

    /// Every stored country, alphabetically
    pub async fn list(&self) -> Result<Vec<CountrySummary>> {
        Ok(self
            .repo
            .list_countries()
            .await?
            .into_iter()
            .map(CountrySummary::from)
            .collect())
    }

    /// Country with its newest posts and current user mood.
    ///
    /// Country and posts come from one consistent read; unknown names get
    /// a neutral placeholder.
    pub async fn snapshot(&self, name: &str, now: DateTime<Utc>) -> Result<CountrySnapshot> {
        let Some(rows) = self.repo.country_snapshot(name, SNAPSHOT_POST_LIMIT).await? else {
            return Ok(CountrySnapshot::placeholder(name));
        };

        let RatingSummary { average, count } = self.ratings.summary(rows.country.id, now).await?;
        let country = rows.country;

        Ok(CountrySnapshot {
            region: region_for(&country.name).map(str::to_string),
            name: country.name,
            subreddit: country.subreddit,
            last_updated: country.last_updated,
            post_count: country.post_count,
            emotion_score: country.emotion_score,
            posts: rows.posts.into_iter().map(PostView::from).collect(),
            user_mood_average: average,
            user_mood_count: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatingsConfig;
    use crate::content::SourcePost;
    use crate::db::testing::memory_pool;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    async fn service() -> (Repository, CountryService) {
        let repo = Repository::new(memory_pool().await);
        let ratings = RatingService::new(repo.clone(), &RatingsConfig::default());
        (repo.clone(), CountryService::new(repo, ratings))
    }

    #[tokio::test]
    async fn unknown_country_gets_placeholder() {
        let (_repo, service) = service().await;

        let snap = service.snapshot("Antigua and Barbuda", at(0)).await.unwrap();
        assert_eq!(snap.subreddit, "AntiguaandBarbuda");
        assert_eq!(snap.region.as_deref(), Some("Caribbean"));
        assert_eq!(snap.post_count, 0);
        assert_eq!(snap.emotion_score, 5);
        assert!(snap.posts.is_empty());
        assert_eq!(snap.user_mood_count, 0);
    }

    #[tokio::test]
    async fn snapshot_orders_posts_newest_first() {
        let (repo, service) = service().await;
        let country = repo.upsert_country_by_name("Aruba", "Aruba").await.unwrap();

        let posts: Vec<SourcePost> = [("old", 0), ("new", 200), ("mid", 100)]
            .into_iter()
            .map(|(id, t)| SourcePost {
                external_id: id.to_string(),
                title: id.to_string(),
                author: "a".to_string(),
                score: 1,
                comment_count: 0,
                permalink: format!("https://reddit.com/{}", id),
                created_at: at(t),
            })
            .collect();
        repo.replace_posts(country.id, &posts, 8, at(300)).await.unwrap();

        let snap = service.snapshot("Aruba", at(400)).await.unwrap();
        let titles: Vec<&str> = snap.posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["new", "mid", "old"]);
        assert_eq!(snap.emotion_score, 8);
        assert_eq!(snap.post_count, 3);
        assert_eq!(snap.last_updated, Some(at(300)));

        let list = service.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].region.as_deref(), Some("Caribbean"));
    }
}

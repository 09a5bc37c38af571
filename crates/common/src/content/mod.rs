//! Content source abstraction
//!
//! Pulls the newest posts of a subreddit:
//! - Reddit app-only OAuth (when client credentials are configured)
//! - Reddit public JSON listings (otherwise)
//! - Mock source for tests

use crate::config::RedditConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Reddit caps listings at 100 items per request
pub const MAX_PAGE_SIZE: usize = 100;

/// One post as returned by a content source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePost {
    pub external_id: String,
    pub title: String,
    pub author: String,
    pub score: i32,
    pub comment_count: i32,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for fetching recent posts
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Newest posts of `source_id`, at most `limit`
    async fn fetch_recent(&self, source_id: &str, limit: usize) -> Result<Vec<SourcePost>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

// ============================================================================
// Reddit
// ============================================================================

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: RedditPost,
}

#[derive(Deserialize)]
struct RedditPost {
    id: String,
    #[serde(default)]
    title: String,
    author: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    created_utc: f64,
}

impl From<RedditPost> for SourcePost {
    fn from(post: RedditPost) -> Self {
        Self {
            external_id: post.id,
            title: post.title,
            author: post
                .author
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "[deleted]".to_string()),
            score: saturate_i32(post.score),
            comment_count: saturate_i32(post.num_comments),
            permalink: format!("https://reddit.com{}", post.permalink),
            created_at: DateTime::from_timestamp(post.created_utc as i64, 0).unwrap_or_default(),
        }
    }
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    expires_in: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

struct OAuthCredentials {
    client_id: String,
    client_secret: String,
}

/// Reddit listing client
pub struct RedditContentSource {
    client: reqwest::Client,
    base_url: String,
    oauth_base_url: String,
    token_url: String,
    credentials: Option<OAuthCredentials>,
    token: RwLock<Option<CachedToken>>,
}

impl RedditContentSource {
    /// Build a client from configuration
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        let credentials = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() => Some(OAuthCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            oauth_base_url: config.oauth_base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Current bearer token, refreshed a minute before expiry
    async fn bearer_token(&self, creds: &OAuthCredentials) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AppError::ContentSource {
                message: format!("Token request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ContentSource {
                message: format!("Token endpoint error {}: {}", status, body),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| AppError::ContentSource {
            message: format!("Failed to parse token response: {}", e),
        })?;

        let ttl = Duration::from_secs(token.expires_in.saturating_sub(60).max(1));
        tracing::debug!(ttl_secs = ttl.as_secs(), "Refreshed Reddit access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });

        Ok(token.access_token)
    }
}

#[async_trait]
impl ContentSource for RedditContentSource {
    async fn fetch_recent(&self, source_id: &str, limit: usize) -> Result<Vec<SourcePost>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();

        let request = match &self.credentials {
            Some(creds) => {
                let token = self.bearer_token(creds).await?;
                self.client
                    .get(format!("{}/r/{}/new", self.oauth_base_url, source_id))
                    .bearer_auth(token)
            }
            None => self
                .client
                .get(format!("{}/r/{}/new.json", self.base_url, source_id)),
        };

        let response = request
            .query(&[("limit", limit.as_str()), ("raw_json", "1")])
            .send()
            .await
            .map_err(|e| AppError::ContentSource {
                message: format!("Request for r/{} failed: {}", source_id, e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ContentSource {
                message: format!("r/{} returned {}: {}", source_id, status, body),
            });
        }

        let listing: Listing = response.json().await.map_err(|e| AppError::ContentSource {
            message: format!("Failed to parse listing for r/{}: {}", source_id, e),
        })?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| SourcePost::from(child.data))
            .collect())
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Content source bound to a page size
#[derive(Clone)]
pub struct ContentFetcher {
    source: Arc<dyn ContentSource>,
    page_size: usize,
}

impl ContentFetcher {
    pub fn new(source: Arc<dyn ContentSource>, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Newest posts of a subreddit, never more than the page size
    pub async fn fetch(&self, subreddit: &str) -> Result<Vec<SourcePost>> {
        let mut posts = self.source.fetch_recent(subreddit, self.page_size).await?;
        posts.truncate(self.page_size);

        tracing::debug!(
            source = self.source.name(),
            subreddit = subreddit,
            count = posts.len(),
            "Fetched posts"
        );

        Ok(posts)
    }
}

// ============================================================================
// Mock
// ============================================================================

enum MockBehavior {
    Generate(usize),
    Fixed(Vec<SourcePost>),
    Fail(String),
}

/// Mock content source for testing
pub struct MockContentSource {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockContentSource {
    /// Answers `count` synthetic posts whose ids are prefixed by the subreddit
    pub fn generating(count: usize) -> Self {
        Self::with(MockBehavior::Generate(count))
    }

    /// Answers the same posts for every subreddit
    pub fn fixed(posts: Vec<SourcePost>) -> Self {
        Self::with(MockBehavior::Fixed(posts))
    }

    /// Fails every request
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with(MockBehavior::Fail(message.into()))
    }

    fn with(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn fetch_recent(&self, source_id: &str, limit: usize) -> Result<Vec<SourcePost>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Generate(count) => Ok((0..(*count).min(limit))
                .map(|i| SourcePost {
                    external_id: format!("{}-{}", source_id, i),
                    title: format!("Post {} from r/{}", i, source_id),
                    author: "mock".to_string(),
                    score: i as i32,
                    comment_count: 0,
                    permalink: format!("https://reddit.com/r/{}/comments/{}", source_id, i),
                    created_at: DateTime::from_timestamp(1_700_000_000 + i as i64, 0)
                        .unwrap_or_default(),
                })
                .collect()),
            MockBehavior::Fixed(posts) => Ok(posts.iter().take(limit).cloned().collect()),
            MockBehavior::Fail(message) => Err(AppError::ContentSource {
                message: message.clone(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Create the production content source from configuration
pub fn create_content_source(config: &RedditConfig) -> Result<Arc<dyn ContentSource>> {
    let source = RedditContentSource::new(config)?;
    if source.credentials.is_some() {
        tracing::info!("Using Reddit OAuth listings");
    } else {
        tracing::info!("Using Reddit public listings");
    }
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_conversion() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "children": [
                    {"kind": "t3", "data": {
                        "id": "abc",
                        "title": "Sunny day in Vaduz",
                        "author": "alpine",
                        "score": 42,
                        "num_comments": 7,
                        "permalink": "/r/liechtenstein/comments/abc/sunny/",
                        "created_utc": 1700000000.0
                    }},
                    {"kind": "t3", "data": {
                        "id": "def",
                        "title": "Removed",
                        "author": null,
                        "permalink": "/r/liechtenstein/comments/def/",
                        "created_utc": 1700000100.0
                    }}
                ]
            }
        }"#;

        let listing: Listing = serde_json::from_str(raw).unwrap();
        let posts: Vec<SourcePost> = listing
            .data
            .children
            .into_iter()
            .map(|c| SourcePost::from(c.data))
            .collect();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].external_id, "abc");
        assert_eq!(posts[0].score, 42);
        assert_eq!(posts[0].comment_count, 7);
        assert_eq!(
            posts[0].permalink,
            "https://reddit.com/r/liechtenstein/comments/abc/sunny/"
        );
        assert_eq!(posts[0].created_at.timestamp(), 1_700_000_000);
        assert_eq!(posts[1].author, "[deleted]");
        assert_eq!(posts[1].score, 0);
    }

    #[test]
    fn test_counts_saturate() {
        assert_eq!(saturate_i32(i64::MAX), i32::MAX);
        assert_eq!(saturate_i32(-5), -5);
    }

    #[tokio::test]
    async fn test_fetcher_truncates_to_page_size() {
        let posts: Vec<SourcePost> = (0..10)
            .map(|i| SourcePost {
                external_id: i.to_string(),
                title: String::new(),
                author: String::new(),
                score: 0,
                comment_count: 0,
                permalink: String::new(),
                created_at: Utc::now(),
            })
            .collect();

        let fetcher = ContentFetcher::new(Arc::new(MockContentSource::fixed(posts)), 4);
        assert_eq!(fetcher.fetch("any").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_generating_and_failing() {
        let source = MockContentSource::generating(3);
        let posts = source.fetch_recent("Chad", 50).await.unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].external_id, "Chad-0");
        assert_eq!(source.calls(), 1);

        let failing = MockContentSource::failing("boom");
        let err = failing.fetch_recent("Chad", 50).await.unwrap_err();
        assert!(matches!(err, AppError::ContentSource { .. }));
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let config = RedditConfig {
            client_id: Some("id".to_string()),
            ..RedditConfig::default()
        };
        assert!(RedditContentSource::new(&config).unwrap().credentials.is_none());

        let config = RedditConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..RedditConfig::default()
        };
        assert!(RedditContentSource::new(&config).unwrap().credentials.is_some());
    }
}

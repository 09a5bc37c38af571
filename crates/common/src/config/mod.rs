//! Configuration management for MoodMap services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Content source (Reddit) configuration
    #[serde(default)]
    pub reddit: RedditConfig,

    /// Sentiment scoring service configuration
    #[serde(default)]
    pub sentiment: SentimentConfig,

    /// Fetch coordinator configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// User mood rating configuration
    #[serde(default)]
    pub ratings: RatingsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Take the client address from `X-Forwarded-For`.
    /// Only enable behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default = "default_enabled")]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedditConfig {
    /// OAuth client id (app-only flow); public listings are used when absent
    pub client_id: Option<String>,

    /// OAuth client secret
    pub client_secret: Option<String>,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Public listing base URL
    #[serde(default = "default_reddit_base_url")]
    pub base_url: String,

    /// OAuth API base URL
    #[serde(default = "default_reddit_oauth_base_url")]
    pub oauth_base_url: String,

    /// OAuth token endpoint
    #[serde(default = "default_reddit_token_url")]
    pub token_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_reddit_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SentimentConfig {
    /// Sentiment provider: openai, neutral
    #[serde(default = "default_sentiment_provider")]
    pub provider: String,

    /// API key for the completion service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_sentiment_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_sentiment_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Minimum seconds between the starts of two fetch cycles
    #[serde(default = "default_fetch_min_interval")]
    pub min_interval_secs: u64,

    /// Seconds after which a held lock is presumed abandoned
    #[serde(default = "default_fetch_stale_after")]
    pub stale_after_secs: u64,

    /// Posts requested per country per cycle
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Worker tick interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upsert the built-in country catalog on startup
    #[serde(default = "default_enabled")]
    pub seed_catalog: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RatingsConfig {
    /// Minimum seconds between two submissions from the same IP
    #[serde(default = "default_rating_min_interval")]
    pub min_interval_secs: u64,

    /// Window in hours during which a resubmission overwrites
    #[serde(default = "default_rating_window")]
    pub window_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (whole gateway)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_database_url() -> String { "sqlite://moodmap.db?mode=rwc".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_user_agent() -> String { "moodmap/0.3 (country mood tracker)".to_string() }
fn default_reddit_base_url() -> String { "https://www.reddit.com".to_string() }
fn default_reddit_oauth_base_url() -> String { "https://oauth.reddit.com".to_string() }
fn default_reddit_token_url() -> String { "https://www.reddit.com/api/v1/access_token".to_string() }
fn default_reddit_timeout() -> u64 { 20 }
fn default_sentiment_provider() -> String { "neutral".to_string() }
fn default_sentiment_model() -> String { "gpt-4o-mini".to_string() }
fn default_sentiment_timeout() -> u64 { 30 }
fn default_fetch_min_interval() -> u64 { 2 }
fn default_fetch_stale_after() -> u64 { 120 }
fn default_page_size() -> usize { 50 }
fn default_poll_interval() -> u64 { 5 }
fn default_rating_min_interval() -> u64 { 5 }
fn default_rating_window() -> u64 { 24 }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "moodmap".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__FETCH__MIN_INTERVAL_SECS=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl FetchConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl RatingsConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_hours * 3600)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_migrate: default_enabled(),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: default_user_agent(),
            base_url: default_reddit_base_url(),
            oauth_base_url: default_reddit_oauth_base_url(),
            token_url: default_reddit_token_url(),
            timeout_secs: default_reddit_timeout(),
        }
    }
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            provider: default_sentiment_provider(),
            api_key: None,
            api_base: None,
            model: default_sentiment_model(),
            timeout_secs: default_sentiment_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_fetch_min_interval(),
            stale_after_secs: default_fetch_stale_after(),
            page_size: default_page_size(),
            poll_interval_secs: default_poll_interval(),
            seed_catalog: default_enabled(),
        }
    }
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_rating_min_interval(),
            window_hours: default_rating_window(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            reddit: RedditConfig::default(),
            sentiment: SentimentConfig::default(),
            fetch: FetchConfig::default(),
            ratings: RatingsConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.fetch.page_size, 50);
        assert_eq!(config.fetch.min_interval(), Duration::from_secs(2));
        assert_eq!(config.ratings.min_interval(), Duration::from_secs(5));
        assert_eq!(config.ratings.window(), Duration::from_secs(24 * 3600));
        assert_eq!(config.sentiment.provider, "neutral");
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.read_database_url(), "sqlite://moodmap.db?mode=rwc");

        config.database.read_url = Some("postgres://replica/moodmap".to_string());
        assert_eq!(config.read_database_url(), "postgres://replica/moodmap");
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let fetch = FetchConfig {
            poll_interval_secs: 0,
            ..FetchConfig::default()
        };
        assert_eq!(fetch.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("fetch.min_interval_secs", 7)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.fetch.min_interval_secs, 7);
        assert_eq!(config.fetch.stale_after_secs, 120);
        assert_eq!(config.database.url, "sqlite://moodmap.db?mode=rwc");
    }
}

//! MoodMap Common Library
//!
//! Shared code for the MoodMap gateway and fetch worker including:
//! - Database models and repository patterns
//! - Fetch coordination (lock, status, coordinator)
//! - Content source and sentiment scoring abstractions
//! - User mood ratings and country views
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod catalog;
pub mod config;
pub mod content;
pub mod countries;
pub mod db;
pub mod errors;
pub mod fetch;
pub mod metrics;
pub mod ratings;
pub mod sentiment;

// Re-export commonly used types
pub use config::AppConfig;
pub use countries::CountryService;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use fetch::{FetchCoordinator, FetchOutcome};
pub use ratings::{RatingOutcome, RatingService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

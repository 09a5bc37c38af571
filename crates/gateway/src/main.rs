//! MoodMap API Gateway
//!
//! HTTP entry point for the map frontend.
//! Handles:
//! - Fetch triggering and progress polling
//! - Country views and mood ratings
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use moodmap_common::{
    catalog,
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository},
    metrics::{self, FETCH_CYCLE_BUCKETS, METRICS_PREFIX},
    ratings::RatingService,
    CountryService, FetchCoordinator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub coordinator: FetchCoordinator,
    pub ratings: RatingService,
    pub countries: CountryService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DbPool,
        coordinator: FetchCoordinator,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let repo = Repository::new(db.clone());
        let ratings = RatingService::new(repo.clone(), &config.ratings);
        let countries = CountryService::new(repo, ratings.clone());

        Self {
            config,
            db,
            coordinator,
            ratings,
            countries,
            metrics,
        }
    }
}

impl FromRef<AppState> for middleware::client_ip::TrustForwardedFor {
    fn from_ref(state: &AppState) -> Self {
        Self(state.config.server.trust_forwarded_for)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    init_tracing(&config.observability);

    info!("Starting MoodMap API Gateway v{}", moodmap_common::VERSION);

    // Initialize metrics
    let metrics_handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_fetch_cycle_duration_seconds", METRICS_PREFIX)),
            FETCH_CYCLE_BUCKETS,
        )?
        .install_recorder()?;
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.auto_migrate {
        db.create_tables().await?;
    }

    let repo = Repository::new(db.clone());
    if config.fetch.seed_catalog {
        catalog::seed_catalog(&repo).await?;
    }

    let coordinator = FetchCoordinator::from_config(repo, &config)?;

    // Create app state
    let state = AppState::new(config.clone(), db, coordinator, Some(metrics_handle));

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// JSON or human-readable logs, filtered by `RUST_LOG` (default `info`)
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Fetch coordinator
        .route("/fetch/advance", post(handlers::fetch::advance))
        .route("/fetch/status", get(handlers::fetch::status))
        // Countries
        .route("/countries", get(handlers::countries::list_countries))
        .route("/countries/{name}", get(handlers::countries::get_country))
        .route("/countries/{name}/mood", post(handlers::countries::submit_mood));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter =
            middleware::rate_limit::create_rate_limiter(limits.requests_per_second, limits.burst);
        api_routes = api_routes.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use moodmap_common::{
        config::DatabaseConfig,
        content::{ContentFetcher, MockContentSource},
        sentiment::{MockSentimentApi, SentimentScorer},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> (Router, Repository) {
        test_app_with(true).await
    }

    async fn test_app_with(trust_forwarded_for: bool) -> (Router, Repository) {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.server.trust_forwarded_for = trust_forwarded_for;
        config.database = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..DatabaseConfig::default()
        };

        let db = DbPool::new(&config.database).await.unwrap();
        db.create_tables().await.unwrap();
        let repo = Repository::new(db.clone());

        let coordinator = FetchCoordinator::new(
            repo.clone(),
            ContentFetcher::new(Arc::new(MockContentSource::generating(3)), 50),
            SentimentScorer::new(Arc::new(MockSentimentApi::answering("7"))),
            &config.fetch,
        );

        let state = AppState::new(Arc::new(config), db, coordinator, None);
        (create_router(state), repo)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value, ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_ready() {
        let (app, _repo) = test_app().await;

        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"]["status"], "up");
    }

    #[tokio::test]
    async fn advance_reports_outcomes() {
        let (app, repo) = test_app().await;

        let (status, body) = call(&app, post_json("/api/fetch/advance", json!({}), "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "no_countries" }));

        repo.upsert_country_by_name("Wakanda", "wakanda").await.unwrap();

        // The empty-store step above claimed the lock moments ago
        let (_, body) = call(&app, post_json("/api/fetch/advance", json!({}), "1.1.1.1")).await;
        assert_eq!(body["status"], "rate_limited");
        assert!(body["wait_time"].as_f64().unwrap() > 0.0);

        let (status, body) = call(&app, get("/api/fetch/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_country"], "Ready");
        assert_eq!(body["is_fetching"], false);
    }

    #[tokio::test]
    async fn mood_submission_flow() {
        let (app, repo) = test_app().await;
        repo.upsert_country_by_name("Chad", "Chad").await.unwrap();

        let (status, body) = call(
            &app,
            post_json("/api/countries/Chad/mood", json!({ "mood_score": 12 }), "9.9.9.9"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = call(
            &app,
            post_json("/api/countries/Chad/mood", json!({ "mood_score": 7 }), "9.9.9.9"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "created");
        assert_eq!(body["user_mood_count"], 1);
        assert_eq!(body["user_mood_average"], 7.0);

        let (status, body) = call(
            &app,
            post_json("/api/countries/Chad/mood", json!({ "mood_score": 3 }), "9.9.9.9"),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert!(body["error"]["details"]["wait_time"].as_f64().unwrap() > 0.0);

        let (status, _) = call(
            &app,
            post_json("/api/countries/Atlantis/mood", json!({ "mood_score": 3 }), "8.8.8.8"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forged_forwarded_for_does_not_dodge_throttle() {
        let (app, repo) = test_app_with(false).await;
        repo.upsert_country_by_name("Chad", "Chad").await.unwrap();

        let (status, _) = call(
            &app,
            post_json("/api/countries/Chad/mood", json!({ "mood_score": 7 }), "1.2.3.4"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            post_json("/api/countries/Chad/mood", json!({ "mood_score": 2 }), "5.6.7.8"),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let chad = repo.find_country_by_name("Chad").await.unwrap().unwrap();
        assert_eq!(repo.count_ratings(chad.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trusted_forwarded_for_separates_clients() {
        let (app, repo) = test_app_with(true).await;
        repo.upsert_country_by_name("Chad", "Chad").await.unwrap();

        for ip in ["1.2.3.4", "5.6.7.8"] {
            let (status, body) = call(
                &app,
                post_json("/api/countries/Chad/mood", json!({ "mood_score": 4 }), ip),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "created");
        }

        let chad = repo.find_country_by_name("Chad").await.unwrap().unwrap();
        assert_eq!(repo.count_ratings(chad.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn country_views() {
        let (app, repo) = test_app().await;
        repo.upsert_country_by_name("Aruba", "Aruba").await.unwrap();

        let (status, body) = call(&app, get("/api/countries")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Aruba");
        assert_eq!(body[0]["region"], "Caribbean");

        let (status, body) = call(&app, get("/api/countries/Antigua%20and%20Barbuda")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subreddit"], "AntiguaandBarbuda");
        assert_eq!(body["emotion_score"], 5);
        assert_eq!(body["posts"], json!([]));
    }

    #[tokio::test]
    async fn metrics_disabled_without_recorder() {
        let (app, _repo) = test_app().await;
        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

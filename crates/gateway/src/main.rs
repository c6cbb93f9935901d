//! DataChat API Gateway
//!
//! The HTTP entry point in front of the shared runtime.
//! Handles:
//! - Session login/logout
//! - Tenant data loading
//! - Chat routing to the session's agent
//! - Rate limiting
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use datachat_common::{
    config::{AppConfig, ObservabilityConfig},
    errors::Result,
    metrics, Runtime,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Room for multipart framing on top of the file size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

impl FromRef<AppState> for Arc<Runtime> {
    fn from_ref(state: &AppState) -> Self {
        state.runtime.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        version = datachat_common::VERSION,
        service = %config.observability.service_name,
        "Starting DataChat API Gateway"
    );

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets_for_metric(Matcher::Suffix("request_duration_seconds".into()), metrics::LATENCY_BUCKETS)?
            .set_buckets_for_metric(Matcher::Suffix("build_duration_seconds".into()), metrics::AGENT_BUCKETS)?
            .set_buckets_for_metric(Matcher::Suffix("turn_duration_seconds".into()), metrics::AGENT_BUCKETS)?
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(addr = %metrics_addr, "Metrics exporter listening");
    }

    // Compose the runtime
    let runtime = Arc::new(Runtime::new(config.clone())?);
    let sweeper = spawn_sweeper(runtime.clone(), config.sweep_interval());

    // Build the router
    let app = create_router(AppState {
        runtime: runtime.clone(),
    })?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host/server.port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if tokio::time::timeout(config.shutdown_timeout(), runtime.shutdown())
        .await
        .is_err()
    {
        warn!("Runtime shutdown timed out");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Periodically evict idle sessions
fn spawn_sweeper(runtime: Arc<Runtime>, interval: Option<Duration>) -> Option<JoinHandle<()>> {
    let period = interval?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = runtime.sweep();
            debug!(evicted, "Session sweep finished");
        }
    }))
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    let config = state.runtime.config().clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = config.server.max_upload_bytes + MULTIPART_OVERHEAD;

    let mut app = Router::new()
        // Health endpoints (no session)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Session endpoints
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", get(handlers::auth::logout).post(handlers::auth::logout))

        // Tenant data endpoints
        .route(
            "/database/upload",
            post(handlers::database::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/database/sample-data", post(handlers::database::sample_data))
        .route("/database/info", get(handlers::database::info))
        .route("/database/schema", get(handlers::database::schema))

        // Chat endpoint
        .route("/chat", post(handlers::chat::chat))
        .layer(from_fn(middleware::metrics::track_requests));

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::RateLimitState::new(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        )?;
        app = app.layer(from_fn_with_state(limiter, middleware::rate_limit::rate_limit));
    }

    // Compose the app
    Ok(app
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

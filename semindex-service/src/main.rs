mod error;
mod metrics;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use semindex_core::Config;
use state::{AppState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semindex-service")]
#[command(about = "HTTP service for semantic code search indexing")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Path to a TOML config file overriding defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for per-collection snapshot storage
    #[arg(long, default_value = ".semindex")]
    snapshot_dir: PathBuf,

    /// API key required on mutating routes (also reads SEMINDEX_API_KEY env var)
    #[arg(long, env = "SEMINDEX_API_KEY")]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .with_env_overrides();

    let state: SharedState = Arc::new(AppState::new(config, args.snapshot_dir));

    // Query routes: public read surface
    let query_routes = Router::new().route("/query", post(routes::query));

    // Mutating routes: collection registration and indexing
    let mutating_routes = Router::new()
        .route("/collections", post(routes::register_collection))
        .route("/collections/{name}/index", post(routes::index_collection));

    let mutating_routes = if let Some(ref key) = args.api_key {
        let key = key.clone();
        mutating_routes.layer(axum::middleware::from_fn(move |req, next| {
            let expected = key.clone();
            api_key_guard(req, next, expected)
        }))
    } else {
        mutating_routes
    };

    // Health/status/metrics: operational observability
    let ops_routes = Router::new()
        .route("/status", get(routes::status))
        .route("/collections/{name}/status", get(routes::collection_status))
        .route("/metrics", get(metrics::metrics));

    let app = Router::new()
        .merge(query_routes)
        .merge(mutating_routes)
        .merge(ops_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.bind, args.port);
    if args.api_key.is_some() {
        tracing::info!(%addr, "semindex-service listening (mutating routes require API key)");
    } else {
        tracing::info!(%addr, "semindex-service listening");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_key_guard(
    req: axum::extract::Request,
    next: axum::middleware::Next,
    expected_key: String,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let provided = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == expected_key => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(semindex_core::ErrorEnvelope::new(
                "unauthorized",
                "Missing or invalid API key",
                "Set the X-Api-Key header to the configured SEMINDEX_API_KEY",
            )),
        )
            .into_response(),
    }
}

//! Elisa Server - HTTP control surface for build sessions
//!
//! An axum adapter on top of `elisa-core`, providing:
//! - RESTful session control (create, start, stop, gate and question replies)
//! - Server-sent event streams of each session's events
//! - Standalone skill runs
//!
//! The router is exposed separately from the listener so it can be embedded
//! in other applications and exercised in tests without a socket.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use elisa_core::state::{AppState, AppStateInner};
use elisa_core::EngineConfig;

/// Configuration for the Elisa backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional path to static frontend files.
    /// When set, the server serves these files for all non-API routes.
    pub static_dir: Option<String>,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Create a shared `AppState` wired with the production collaborators.
pub fn create_app_state(engine: EngineConfig) -> Result<AppState, String> {
    std::fs::create_dir_all(&engine.projects_dir).map_err(|e| {
        format!(
            "Failed to create projects dir {}: {}",
            engine.projects_dir.display(),
            e
        )
    })?;
    Ok(Arc::new(AppStateInner::new(engine)))
}

/// Build the application router: API routes, health check, CORS and
/// request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Elisa backend server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "elisa_core=info,elisa_server=info,tower_http=info".into()),
        )
        .try_init();

    tracing::info!(
        "Starting Elisa backend server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(config.engine.clone())?;

    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let mut app = build_router(state);

    // Serve static frontend files if configured
    if let Some(ref static_dir) = config.static_dir {
        let static_path = std::path::Path::new(static_dir);
        if static_path.is_dir() {
            tracing::info!("Serving static frontend from: {}", static_dir);
            let serve_dir = tower_http::services::ServeDir::new(static_dir)
                .not_found_service(tower_http::services::ServeFile::new(
                    static_path.join("index.html"),
                ));
            app = app.fallback_service(serve_dir);
        } else {
            tracing::warn!(
                "Static directory not found: {}. Frontend won't be served.",
                static_dir
            );
        }
    }

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Elisa backend server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "elisa-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

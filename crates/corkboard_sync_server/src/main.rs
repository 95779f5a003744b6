use std::sync::Arc;

use axum::{Router, routing::get};
use corkboard_core::events::EventBus;
use corkboard_core::hierarchy::BoardService;
use corkboard_core::store::{BoardRepo, init_database};
use corkboard_sync_server::{
    Config,
    handlers::{ApiState, WsState, api_routes, ws_handler},
    sync::{Broadcaster, ConnectionRegistry},
};
use rusqlite::Connection;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corkboard_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Corkboard Sync Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("CORS origins: {:?}", config.cors_origins);

    // Initialize database
    let conn = match Connection::open(&config.database_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_database(&conn) {
        error!("Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    // Create shared state
    let repo = Arc::new(BoardRepo::new(conn));
    let bus = Arc::new(EventBus::new());
    let service = Arc::new(BoardService::new(repo.clone(), bus.clone()));
    let registry = Arc::new(ConnectionRegistry::new());

    // Wire committed mutations to the live audience
    let broadcaster = Arc::new(Broadcaster::new(repo.clone(), registry.clone()));
    broadcaster.attach(&bus);

    let api_state = ApiState {
        repo: repo.clone(),
        service: service.clone(),
    };
    let ws_state = WsState {
        repo: repo.clone(),
        registry: registry.clone(),
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any); // In production, use specific origins from config

    // Build the router
    let app = Router::new()
        // Health check
        .route("/", get(|| async { "Corkboard Sync Server" }))
        .route("/health", get(|| async { "OK" }))
        // WebSocket push endpoint
        .route("/sync", get(ws_handler).with_state(ws_state))
        // Mutation + fetch surface
        .nest("/api", api_routes(api_state))
        // Add layers
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

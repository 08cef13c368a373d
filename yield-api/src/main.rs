//! DeFi Yield Engine API Server
//!
//! HTTP API server that aggregates yield opportunities from DefiLlama-backed
//! protocol sources and exposes health, risk and sync controls.

mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use yield_adapters::{LlamaMetricsClient, LlamaProtocolAdapter, LlamaYieldsClient};
use yield_core::{ChartProvider, SourceAdapter};
use yield_services::{EngineConfig, YieldEngine};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<YieldEngine>,
    /// Shared DefiLlama client, for rate limiter reporting
    pub llama: Arc<LlamaYieldsClient>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,yield_api=debug")),
        )
        .init();

    info!("Starting DeFi Yield Engine API");

    let config = EngineConfig::from_env()?;
    info!(
        "Tracking {} protocols, aggregation method {}",
        config.sources.protocols.len(),
        config.reliability.aggregation_method
    );

    // One shared, rate-limited client behind every source
    let client = Arc::new(LlamaYieldsClient::new()?);

    // The coordinator owns retries, so adapters make a single attempt
    let adapters: Vec<Arc<dyn SourceAdapter>> = config
        .sources
        .protocols
        .iter()
        .map(|project| {
            let mut adapter = LlamaProtocolAdapter::new(Arc::clone(&client), project.as_str())
                .with_retry(1, config.reliability.retry_delay());
            if let Some(chain) = &config.sources.chain {
                adapter = adapter.with_chain(chain.as_str());
            }
            Arc::new(adapter) as Arc<dyn SourceAdapter>
        })
        .collect();

    let metrics = Arc::new(LlamaMetricsClient::new(Arc::clone(&client)));
    let charts: Arc<dyn ChartProvider> = Arc::clone(&client) as Arc<dyn ChartProvider>;

    info!("Initializing cache at: {}", config.db_path);
    let engine = Arc::new(YieldEngine::open(config, adapters, metrics, Some(charts))?);
    engine.start();

    // Warm the opportunity cache in the background
    let warm_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let opportunities = warm_engine.list_opportunities().await;
        info!("Cache warmed with {} opportunities", opportunities.len());
    });

    let state = AppState {
        engine: Arc::clone(&engine),
        llama: client,
    };

    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // Build router
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    // Start server
    let port = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Trackshop API Server
//!
//! Receives payment-provider webhooks, keeps the purchase ledger and issues
//! download links for purchased tracks.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackshop_api::{
    config::{LogFormat, StorageBackend},
    routes::create_router,
    AppState, Config, TrackCatalog,
};
use trackshop_ledger::{create_pool, run_migrations, LedgerService, LedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,trackshop_api=debug,trackshop_ledger=debug".into());
    match config.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!("Starting Trackshop API Server v{}", env!("CARGO_PKG_VERSION"));

    let store = match (config.storage_backend, config.database_url.as_deref()) {
        (StorageBackend::Postgres, Some(database_url)) => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(
                database_url,
                config.database_max_connections,
                config.request_timeout,
            )
            .await?;
            tracing::info!("Database connection established");

            if config.run_migrations {
                tracing::info!("Running database migrations...");
                run_migrations(&pool).await?;
            } else {
                tracing::info!("Database migrations skipped (RUN_MIGRATIONS=false)");
            }
            LedgerStore::postgres(pool)
        }
        (StorageBackend::Postgres, None) => anyhow::bail!("DATABASE_URL must be set"),
        (StorageBackend::Memory, _) => {
            tracing::warn!("Using in-memory storage: purchases are lost on restart");
            LedgerStore::new_in_memory()
        }
    };

    let catalog = match &config.track_catalog_path {
        Some(path) => TrackCatalog::load(path)?,
        None => TrackCatalog::builtin(),
    };

    let cors = build_cors(&config.allowed_origins);
    let addr: SocketAddr = config.bind_address.parse()?;

    let state = AppState::new(LedgerService::new(store), catalog, config);

    let app = create_router(state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        tracing::info!("CORS configured for any origin");
        AllowOrigin::any()
    } else {
        tracing::info!(
            allowed_origins = ?origins,
            "CORS configured with {} allowed origins",
            origins.len()
        );
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}

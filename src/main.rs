use anyhow::{Context, Result};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod store;

use config::{AppConfig, Backend, LogFormat};
use handlers::AppState;
use services::file_service::FileService;
use store::{LocalStore, MemoryStore, ObjectStore, S3Store};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(
        backend = ?cfg.backend,
        bucket = %cfg.bucket,
        environment = %cfg.environment,
        "Starting file-manager"
    );

    // --- Handle migration mode ---
    if migrate {
        if cfg.backend != Backend::Local {
            anyhow::bail!("--migrate only applies to the local backend");
        }
        LocalStore::connect(&cfg.database_url, &cfg.storage_dir)
            .await
            .context("applying local schema")?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::S3 => {
            tracing::info!("Using S3 endpoint {}", cfg.s3.endpoint_url());
            Arc::new(S3Store::new(&cfg.s3))
        }
        Backend::Local => Arc::new(
            LocalStore::connect(&cfg.database_url, &cfg.storage_dir)
                .await
                .context("opening local store")?,
        ),
        Backend::Memory => {
            tracing::warn!("Using in-memory store; files are lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Core service ---
    let files = FileService::new(
        store,
        cfg.bucket.clone(),
        cfg.s3.region.clone(),
        cfg.upload_policy(),
    );
    files
        .initialize_bucket()
        .await
        .context("initializing bucket")?;

    // --- Build router ---
    let state = AppState::new(files, !cfg.is_production());
    let app = routes::routes::app(state, &cfg.cors_origin);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;

mod config;
mod errors;
mod handlers;
mod logging;
mod models;
mod repository;
mod routes;
mod services;

use repository::SqliteCatalog;
use services::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let _log_guard = logging::init(&cfg)?;

    tracing::info!("Starting boxed with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let catalog = Arc::new(SqliteCatalog::connect(&cfg.database_url, 5).await?);
    let statements = catalog.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete ({} statements).", statements);
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let state = AppState::new(catalog, cfg.storage_dir.clone(), cfg.dedup_scope);
    if cfg.janitor_enabled {
        state.janitor.start_scheduled(&cfg.clean_schedule)?;
    } else {
        tracing::info!("Scheduled janitor disabled; use POST /janitor/clean");
    }
    let janitor = state.janitor.clone();
    let shutdown = state.shutdown.clone();

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes()).with_state(state);

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
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    janitor.stop().await;
    Ok(())
}

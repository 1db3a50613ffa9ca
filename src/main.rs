use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_vault::{
    api,
    config::{Config, StorageBackend},
    object_store as obj,
    queue::RedbQueue,
    storage::Database,
    workers, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "file-vault starting");

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration for instance: {}", config.node.id);

    // Initialize database and broker log
    let db = Database::open(&config.node.data_dir)?;
    let queue = RedbQueue::open(&config.node.data_dir)?;
    info!("Database and queue opened at: {}", config.node.data_dir);

    // Initialize object store backend
    let (object_store, local_store) = match config.storage.backend {
        StorageBackend::Local => {
            let signer = obj::UrlSigner::new(
                &config.node.public_url,
                config.storage.signing_secret.as_bytes(),
            );
            let store = Arc::new(obj::LocalStore::new(
                &config.storage.local_storage_path,
                signer,
            )?);
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            (store.clone() as Arc<dyn obj::ObjectStore>, Some(store))
        }
        StorageBackend::Gcs => {
            let bucket = config
                .storage
                .gcs_bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("GCS_BUCKET is required when STORAGE_BACKEND=gcs"))?;
            let store =
                obj::GcsStore::new(bucket, config.storage.gcs_credentials_file.as_deref()).await?;
            info!("Using GCS storage backend, bucket: {}", bucket);
            (Arc::new(store) as Arc<dyn obj::ObjectStore>, None)
        }
    };

    if let Err(e) = workers::ensure_placeholder(object_store.as_ref()).await {
        tracing::warn!(error = %e, "Could not store placeholder preview");
    }

    // Create shared state and start background work
    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        queue,
        object_store,
        local_store,
    ));
    let cancel = CancellationToken::new();
    let background = state.spawn_background(&cancel);

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the loops finish their current iteration
    info!("Stopping background tasks");
    cancel.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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

    info!("Shutdown signal received, draining connections");
}

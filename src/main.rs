//! Ether Server - conversation content synchronization
//!
//! Clients edit conversation documents collaboratively and publish their
//! edits as patch sets on a partitioned update log. This server:
//! - consumes the update log and applies each patch to the stored content
//! - serializes writes per document through the write coordinator
//! - stamps each conversation's last-modified time after its content changes
//! - serves conversation metadata and content over HTTP

use anyhow::Context;
use axum::http::Method;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod api;
mod config;
mod patch;
mod storage;
mod sync;
#[cfg(test)]
mod testing;

use api::AppState;
use config::ServerConfig;
use patch::PatchEngine;
use storage::{CachedStore, DocumentStore, FileStore, SledMetadataStore};
use sync::WriteCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ether_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Opening metadata database at: {}", config.storage.db_path.display());
    let metadata = Arc::new(
        SledMetadataStore::open(&config.storage).context("Failed to open metadata database")?,
    );

    info!("Content directory: {}", config.storage.content_dir.display());
    let files = FileStore::open(&config.storage.content_dir)
        .await
        .context("Failed to open content directory")?;
    let documents: Arc<dyn DocumentStore> = match config.storage.cache_ttl {
        Some(ttl) => {
            info!("Content cache enabled ({}s)", ttl.as_secs());
            Arc::new(CachedStore::new(files, ttl))
        }
        None => Arc::new(files),
    };

    let coordinator = Arc::new(WriteCoordinator::start(
        documents.clone(),
        Arc::new(PatchEngine::default()),
        config.coordinator.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let consumer = spawn_consumer(
        &config,
        coordinator.clone(),
        metadata.clone(),
        shutdown_tx.subscribe(),
    )?;

    let state = Arc::new(AppState::new(
        metadata.clone(),
        documents,
        coordinator.clone(),
    ));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Ether server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop reading updates before the writers go away
    let _ = shutdown_tx.send(());
    if let Some(consumer) = consumer {
        if let Err(e) = consumer.await {
            error!("Update consumer task failed: {}", e);
        }
    }

    info!("Draining pending writes");
    coordinator.shutdown().await;
    metadata.flush().context("Failed to flush metadata")?;

    Ok(())
}

/// Start reading the update log until `shutdown` fires. The task drains the
/// coordinator and waits for pending touches before it ends. A fatal
/// consumer error flushes metadata and ends the process.
#[cfg(feature = "kafka")]
fn spawn_consumer(
    config: &ServerConfig,
    coordinator: Arc<WriteCoordinator>,
    metadata: Arc<SledMetadataStore>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    use sync::kafka::KafkaLog;
    use sync::StreamConsumer;

    let log = KafkaLog::connect(&config.log).context("Failed to connect to the update log")?;

    let task = tokio::spawn(async move {
        let mut consumer = StreamConsumer::new(log, coordinator.clone(), metadata.clone());
        let result = consumer
            .run(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        coordinator.shutdown().await;
        info!(
            "Consumer {:?} after {} messages, finishing {} metadata update(s)",
            consumer.state(),
            consumer.processed(),
            consumer.pending_touches()
        );
        consumer.wait_for_touches().await;

        if let Err(err) = result {
            error!("Update stream lost, shutting down: {}", err);
            if let Err(e) = metadata.flush() {
                error!("Failed to flush metadata: {}", e);
            }
            std::process::exit(1);
        }
    });
    Ok(Some(task))
}

#[cfg(not(feature = "kafka"))]
fn spawn_consumer(
    config: &ServerConfig,
    _coordinator: Arc<WriteCoordinator>,
    _metadata: Arc<SledMetadataStore>,
    _shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    tracing::warn!(
        "Built without the kafka feature - not consuming updates from {} ({})",
        config.log.brokers, config.log.topic
    );
    Ok(None)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

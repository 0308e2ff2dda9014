mod archive;
mod config;
mod db;
mod embedding;
mod errors;
mod extraction;
mod llm_client;
mod matching;
mod models;
mod pipeline;
mod retry;
mod routes;
mod state;
mod storage;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::archive::S3Archive;
use crate::config::{Config, VectorStoreKind};
use crate::db::create_pool;
use crate::embedding::memory::InMemoryVectorStore;
use crate::embedding::ollama::OllamaEmbedder;
use crate::embedding::qdrant::QdrantStore;
use crate::embedding::VectorStore;
use crate::llm_client::LlmClient;
use crate::pipeline::lock::RedisLocks;
use crate::pipeline::{Capabilities, Orchestrator};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HireFlow API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db.clone()));

    // Initialize Redis entity locks
    let redis = redis::Client::open(config.redis_url.clone())
        .context("invalid REDIS_URL")?;
    let locks = Arc::new(RedisLocks::new(
        redis,
        Duration::from_secs(config.lock_ttl_secs),
        Duration::from_secs(config.lock_wait_secs),
    ));
    info!("Redis lock client initialized");

    // Initialize S3 / MinIO document archive
    let s3 = build_s3_client(&config).await;
    let archive = Arc::new(S3Archive::new(s3, config.s3_bucket.clone()));
    info!("S3 archive initialized (bucket: {})", config.s3_bucket);

    // Initialize LLM and embedding capabilities
    let llm = LlmClient::new(&config.ollama_url, &config.llm_model, config.retry_policy())
        .context("failed to build LLM client")?;
    info!("LLM client initialized (model: {})", config.llm_model);

    let embedder = OllamaEmbedder::new(
        &config.ollama_url,
        &config.embedding_model,
        config.capability_timeout(),
    )
    .context("failed to build embedding client")?;
    info!("Embedding client initialized (model: {})", config.embedding_model);

    let vectors: Arc<dyn VectorStore> = match config.vector_store {
        VectorStoreKind::Qdrant => {
            info!("Vector store: Qdrant at {}", config.qdrant_url);
            Arc::new(
                QdrantStore::new(
                    &config.qdrant_url,
                    config.qdrant_api_key.clone(),
                    config.capability_timeout(),
                )
                .context("failed to build Qdrant client")?,
            )
        }
        VectorStoreKind::Memory => {
            warn!("Vector store: in-process memory, vectors are lost on restart");
            Arc::new(InMemoryVectorStore::new())
        }
    };

    let caps = Capabilities {
        jobs: store.clone(),
        candidates: store.clone(),
        matches: store,
        llm: Arc::new(llm),
        embedder: Arc::new(embedder),
        vectors,
        archive,
        locks,
    };
    let orchestrator = Arc::new(Orchestrator::new(caps, config.pipeline_settings()));

    // Build app state
    let state = AppState {
        orchestrator: orchestrator.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C after asking every in-flight pipeline run to stop.
async fn shutdown_signal(orchestrator: Arc<Orchestrator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received");
    orchestrator.shutdown();
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "hireflow-static",
    );

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

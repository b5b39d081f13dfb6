mod config;
mod credits;
mod db;
mod errors;
mod extraction;
mod generation;
mod jobs;
mod llm_client;
mod models;
mod notifications;
mod routes;
mod state;
mod state_machine;
mod storage;

#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::credits::CreditLedger;
use crate::db::create_pool;
use crate::extraction::DocumentExtractor;
use crate::generation::GenerationService;
use crate::jobs::{spawn_workers, ActiveBatches, Dispatcher, JobQueue, JobRunner};
use crate::llm_client::anthropic::AnthropicClient;
use crate::llm_client::google::GoogleClient;
use crate::llm_client::openai::OpenAiClient;
use crate::llm_client::ProviderRegistry;
use crate::notifications::{BroadcastHub, NotificationSink};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{ArtifactRepository, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TailorCraft API v{}", env!("CARGO_PKG_VERSION"));

    // Storage: Postgres when configured, otherwise process-local
    let (artifacts, ledger): (Arc<dyn ArtifactRepository>, Arc<dyn CreditLedger>) =
        match &config.database_url {
            Some(url) => {
                let store = PgStore::new(create_pool(url).await?);
                (Arc::new(store.clone()), Arc::new(store))
            }
            None => {
                warn!("DATABASE_URL is not set; artifacts and balances are kept in memory only");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let providers = build_providers(&config)?;
    info!("Providers registered: {:?}", providers.kinds());
    let generation = GenerationService::new(providers);

    // Notifications fan out to SSE subscribers
    let hub = Arc::new(BroadcastHub::new());
    let sink: Arc<dyn NotificationSink> = hub.clone();

    // Job queue and workers
    let (queue, rx) = JobQueue::bounded(config.queue_capacity);
    let dispatcher = Dispatcher::new(
        artifacts.clone(),
        ledger.clone(),
        queue,
        ActiveBatches::new(),
    );
    let runner = JobRunner::new(
        artifacts.clone(),
        ledger.clone(),
        generation.clone(),
        sink,
        config.retry_base_delay,
    );
    let workers = spawn_workers(runner, rx, config.worker_concurrency);

    let state = AppState {
        artifacts,
        ledger,
        generation,
        dispatcher,
        hub,
        extractor: DocumentExtractor::new(config.max_upload_bytes),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown requested, no longer accepting requests");
        })
        .await?;

    // The router held the last queue sender; the worker loop ends once the queue drains
    workers.await?;
    info!("Job workers stopped");

    Ok(())
}

/// Registers every provider with a configured key. OpenAI is required.
fn build_providers(config: &Config) -> Result<ProviderRegistry> {
    let timeout = config.provider_timeout;
    let mut registry = ProviderRegistry::new().register(Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        timeout,
    )?));

    match &config.anthropic_api_key {
        Some(key) => {
            registry = registry.register(Arc::new(AnthropicClient::new(key.clone(), timeout)?))
        }
        None => warn!("ANTHROPIC_API_KEY is not set; expressive letters fall back to OpenAI"),
    }
    match &config.google_api_key {
        Some(key) => registry = registry.register(Arc::new(GoogleClient::new(key.clone(), timeout)?)),
        None => info!("GOOGLE_API_KEY is not set; Google is unavailable as a preferred provider"),
    }

    Ok(registry)
}

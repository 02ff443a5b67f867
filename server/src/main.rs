use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{info, warn};

use specdigest::db::Database;
use specdigest::{
    build_router, load_settings, logging, AppState, LlmAnalyzer, OpenAiProvider, Pipeline,
    PipelineDeps, QueryService, StateStore, WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings().context("Failed to load settings")?;
    logging::init(&settings.log_level, settings.log_json).context("Failed to initialize logging")?;
    info!(environment = %settings.environment, "Starting specdigest");

    let db_path = settings.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open state database at {}", db_path.display()))?;
    let store = StateStore::with_ttl(db, settings.state_ttl());
    match store.purge_expired() {
        Ok(0) => {}
        Ok(purged) => info!(purged, "Removed expired job states"),
        Err(e) => warn!(error = %e, "Failed to purge expired job states"),
    }

    let api_key = settings
        .api_key()
        .context("Failed to resolve the provider API key")?
        .ok_or_else(|| anyhow!("No provider API key configured"))?;
    let provider = OpenAiProvider::new(api_key, settings.openai_base_url.clone())?;
    let analyzer = LlmAnalyzer::new(Arc::new(provider), settings.llm.clone());

    let storage_root = settings.storage_root();
    std::fs::create_dir_all(&storage_root)
        .with_context(|| format!("Failed to create storage root {}", storage_root.display()))?;

    let deps = PipelineDeps {
        store: store.clone(),
        storage_root: storage_root.clone(),
        analyzer: analyzer.clone(),
        retry: settings.retry_policy(),
    };
    let pool = Arc::new(WorkerPool::new(deps, settings.worker_count, Handle::current())?);

    let state = AppState {
        store,
        storage_root: storage_root.clone(),
        pipeline: Pipeline::new(pool.clone()),
        queries: QueryService::new(analyzer, &storage_root),
        max_upload_bytes: settings.max_upload_bytes,
    };

    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    info!(address = %settings.bind_address, "Listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown();
    let waiter = Arc::clone(&pool);
    tokio::task::spawn_blocking(move || waiter.wait())
        .await
        .context("Worker pool did not shut down cleanly")?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

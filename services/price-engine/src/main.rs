use std::sync::Arc;

use price_engine::config::EngineConfig;
use price_engine::cycle::PriceEngine;
use price_engine::docstore::{DocumentStore, MemoryStore};
use price_engine::kv::{KvStore, MemoryKv};
use price_engine::ws;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!(version = price_engine::SERVICE_VERSION, "starting price engine");

    let config = EngineConfig::from_env();
    let bind_addr = config.server.bind_addr.clone();

    // Store seams default to the in-process backends; swap in real clients
    // behind the same traits for an external deployment.
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::with_defaults());
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let engine = PriceEngine::bootstrap(config, kv, store).await?;
    engine.spawn_cycle_loop();
    engine.aggregator().spawn_schedule();

    ws::serve(engine, &bind_addr).await
}

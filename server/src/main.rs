use std::sync::Arc;
use swarmlink_server::{IngestListener, ListenerConfig};
use swarmlink_shared::InMemoryStore;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let mut config = ListenerConfig::default();
    config.apply_env();

    let store = Arc::new(InMemoryStore::new());
    let handle = IngestListener::bind(config, store).await?.spawn()?;
    info!("Standalone ingestion server on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.stop().await;

    Ok(())
}

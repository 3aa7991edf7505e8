mod command;
mod connection;
mod transport;

use command::{CommandResult, Dispatcher};
use connection::{run_event_bridge, ClientConfig, ConnectionEvent, CoordinatorClient};
use std::sync::Arc;
use swarmlink_server::{IngestListener, ListenerConfig};
use swarmlink_shared::{DroneRegistry, InMemoryStore, TaskStore};
use transport::TcpConnector;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let store = Arc::new(InMemoryStore::new());

    let mut listener_config = ListenerConfig::default();
    listener_config.apply_env();
    let listener = IngestListener::bind(listener_config, store.clone())
        .await?
        .spawn()?;
    info!("Ingestion listener on {}", listener.local_addr());

    let mut client_config = ClientConfig::default();
    client_config.apply_env();
    info!("Coordinator: {}", client_config.coordinator_addr);

    let connector = TcpConnector::new(
        client_config.coordinator_addr.clone(),
        client_config.connect_timeout,
    );
    let (client, mut events) = CoordinatorClient::new(client_config, connector);
    let _drain = client.start();
    let _poll = client.spawn_roster_poll();

    // Store changes flow out to the coordinator
    let bridge = tokio::spawn(run_event_bridge(
        client.clone(),
        store.subscribe_drones(),
        store.subscribe_tasks(),
    ));

    let dispatcher = Dispatcher::new(store.clone(), store.clone());

    // Main event loop
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected) => info!("Coordinator link up"),
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Coordinator link lost: {}", reason);
                }
                Some(ConnectionEvent::ReconnectExhausted { attempts }) => {
                    error!(
                        "Coordinator unreachable after {} attempts ({} total), awaiting next poll",
                        attempts,
                        client.total_attempts()
                    );
                }
                Some(ConnectionEvent::Received(frame)) => {
                    let result = dispatcher.dispatch(&frame).await;
                    if let CommandResult::Completed { message } = result {
                        debug!("{}: {}", frame.kind, message);
                    }
                }
                None => {
                    error!("Coordinator client closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    bridge.abort();
    client.shutdown().await;
    listener.stop().await;
    info!("Stopped");

    Ok(())
}

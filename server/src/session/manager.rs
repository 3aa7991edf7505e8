//! Ingestion listener: accepts worker connections and bounds concurrency

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarmlink_shared::{limits, TaskStore};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connection::WorkerSession;
use super::handler::ReportHandler;

/// Configuration for the ingestion listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind, all interfaces by default
    pub bind_addr: String,
    /// Connections serviced at once; further ones wait in the backlog
    pub max_connections: usize,
    /// Pause between capacity checks while full
    pub capacity_poll: Duration,
    /// Read timeout for headers and ordinary payloads
    pub read_timeout: Duration,
    /// Bound on closing the write side of a finished connection
    pub write_timeout: Duration,
    /// Read timeout once a transfer is above the large threshold
    pub large_read_timeout: Duration,
    pub buffer_size: usize,
    pub large_buffer_size: usize,
    pub large_transfer_threshold: u64,
    pub max_image_size: u64,
    pub stats_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5009".into(),
            max_connections: limits::MAX_CONCURRENT_CONNECTIONS,
            capacity_poll: Duration::from_secs(1),
            read_timeout: Duration::from_millis(limits::RECEIVE_TIMEOUT_MS),
            write_timeout: Duration::from_millis(limits::SEND_TIMEOUT_MS),
            large_read_timeout: Duration::from_millis(limits::LARGE_TRANSFER_TIMEOUT_MS),
            buffer_size: limits::BUFFER_SIZE,
            large_buffer_size: limits::LARGE_TRANSFER_BUFFER_SIZE,
            large_transfer_threshold: limits::LARGE_TRANSFER_THRESHOLD,
            max_image_size: limits::MAX_IMAGE_SIZE,
            stats_interval: Duration::from_millis(limits::STATS_INTERVAL_MS),
        }
    }
}

impl ListenerConfig {
    /// Apply `SWARMLINK_LISTEN_ADDR` / `SWARMLINK_MAX_CONNECTIONS` overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("SWARMLINK_LISTEN_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(raw) = lookup("SWARMLINK_MAX_CONNECTIONS") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.max_connections = n,
                _ => warn!(value = %raw, "Ignoring invalid SWARMLINK_MAX_CONNECTIONS"),
            }
        }
    }
}

/// Counters shared by every connection task
#[derive(Debug, Default)]
pub struct ListenerStats {
    active: AtomicUsize,
    total_connections: AtomicU64,
    total_bytes: AtomicU64,
    total_images: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_bytes: u64,
    pub total_images: u64,
}

impl ListenerStats {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn add_bytes(&self, n: u64) {
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_image(&self) {
        self.total_images.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_images: self.total_images.load(Ordering::Relaxed),
        }
    }

    fn open(self: &Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(self.clone())
    }
}

/// Releases a connection slot however the task ends
struct ActiveGuard(Arc<ListenerStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bound but not yet running listener
pub struct IngestListener {
    listener: TcpListener,
    config: Arc<ListenerConfig>,
    handler: ReportHandler,
    stats: Arc<ListenerStats>,
}

impl IngestListener {
    pub async fn bind(config: ListenerConfig, tasks: Arc<dyn TaskStore>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind ingestion listener on {}", config.bind_addr))?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            handler: ReportHandler::new(tasks),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop and the statistics reporter
    pub fn spawn(self) -> Result<ListenerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let stats_task = tokio::spawn(report_stats(
            stats.clone(),
            self.config.stats_interval,
            shutdown_rx.clone(),
        ));
        let accept_task = tokio::spawn(self.accept_loop(shutdown_rx));

        info!(%local_addr, "Ingestion listener started");

        Ok(ListenerHandle {
            local_addr,
            stats,
            shutdown: shutdown_tx,
            accept_task,
            stats_task,
        })
    }

    async fn accept_loop(self, mut shutdown: watch::Receiver<bool>) {
        'accept: loop {
            // Leave new connections in the backlog while at capacity
            while self.stats.active() >= self.config.max_connections {
                tokio::select! {
                    _ = sleep(self.config.capacity_poll) => {}
                    _ = shutdown.changed() => break 'accept,
                }
            }

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        sleep(self.config.capacity_poll).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break 'accept,
            };

            let guard = self.stats.open();
            tokio::spawn(serve(
                stream,
                peer,
                self.config.clone(),
                self.handler.clone(),
                self.stats.clone(),
                shutdown.clone(),
                guard,
            ));
        }

        info!(active = self.stats.active(), "Ingestion listener stopped");
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ListenerConfig>,
    handler: ReportHandler,
    stats: Arc<ListenerStats>,
    mut shutdown: watch::Receiver<bool>,
    _guard: ActiveGuard,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }
    debug!(%peer, "Worker connected");

    let write_timeout = config.write_timeout;
    let mut session = WorkerSession::new(peer, stream, config, handler, stats);

    tokio::select! {
        result = session.run() => match result {
            Ok(()) => debug!(%peer, "Worker disconnected"),
            Err(e) => warn!(%peer, error = %e, "Closing worker connection"),
        },
        _ = shutdown.changed() => {
            debug!(%peer, "Listener stopping, abandoning connection");
            return;
        }
    }

    let mut stream = session.into_inner();
    let _ = timeout(write_timeout, stream.shutdown()).await;
}

async fn report_stats(
    stats: Arc<ListenerStats>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    active = s.active_connections,
                    connections = s.total_connections,
                    bytes = s.total_bytes,
                    images = s.total_images,
                    "Ingestion statistics"
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Running listener
pub struct ListenerHandle {
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    stats_task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Close every worker connection and the listening socket
    ///
    /// In-flight transfers are abandoned.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        let _ = self.stats_task.await;
    }
}

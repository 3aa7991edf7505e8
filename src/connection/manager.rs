//! Coordinator client with a persistent connection and bounded reconnection

use anyhow::Result;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarmlink_shared::codec::{control, CodecError, ControlDecoder};
use swarmlink_shared::{limits, ControlFrame};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::queue::SendQueue;
use crate::transport::TransportConnector;

/// Events emitted by the coordinator client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connected and handshake written
    Connected,
    /// Lost the connection; a reconnect cycle follows
    Disconnected { reason: String },
    /// Every attempt of a reconnect cycle failed
    ReconnectExhausted { attempts: u32 },
    /// Frame received from the coordinator
    Received(ControlFrame),
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Send queue full ({0} frames), frame dropped")]
    QueueFull(usize),

    #[error("Encode failed: {0}")]
    Codec(#[from] CodecError),
}

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator host:port
    pub coordinator_addr: String,
    pub queue_capacity: usize,
    /// Connect attempts per reconnect cycle
    pub max_reconnect_attempts: u32,
    /// Fixed pause between attempts
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
    /// Roster poll period
    pub poll_interval: Duration,
    pub read_buffer_size: usize,
    /// Frame written first on every new connection
    pub handshake: ControlFrame,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "192.168.31.35:5007".into(),
            queue_capacity: limits::SEND_QUEUE_CAPACITY,
            max_reconnect_attempts: limits::MAX_RECONNECT_ATTEMPTS,
            retry_interval: Duration::from_millis(limits::RECONNECT_INTERVAL_MS),
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(limits::ROSTER_POLL_INTERVAL_MS),
            read_buffer_size: 20 * 1024,
            handshake: ControlFrame::command("start_all", "30"),
        }
    }
}

impl ClientConfig {
    /// Apply the `SWARMLINK_COORDINATOR_ADDR` override
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("SWARMLINK_COORDINATOR_ADDR") {
            if addr.trim().is_empty() {
                warn!("Ignoring empty SWARMLINK_COORDINATOR_ADDR");
            } else {
                self.coordinator_addr = addr;
            }
        }
    }
}

struct Shared<C: TransportConnector> {
    config: ClientConfig,
    connector: C,
    queue: SendQueue,
    /// Only the drain routine and the connect path write through this
    writer: Mutex<Option<WriteHalf<C::Stream>>>,
    receiver: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Held for the duration of a reconnect cycle
    cycle: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    total_attempts: AtomicU64,
    /// Bumped per connection so a stale receive loop cannot tear down a newer link
    generation: AtomicU64,
    drain: Notify,
    shutdown: watch::Sender<bool>,
    events: mpsc::Sender<ConnectionEvent>,
}

/// Persistent command channel to the coordinator
pub struct CoordinatorClient<C: TransportConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TransportConnector> Clone for CoordinatorClient<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: TransportConnector> CoordinatorClient<C> {
    /// Create a client; nothing runs until [`start`](Self::start)
    pub fn new(config: ClientConfig, connector: C) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, event_rx) = mpsc::channel(100);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            queue: SendQueue::new(config.queue_capacity),
            config,
            connector,
            writer: Mutex::new(None),
            receiver: parking_lot::Mutex::new(None),
            cycle: Mutex::new(()),
            state,
            attempts: AtomicU32::new(0),
            total_attempts: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            drain: Notify::new(),
            shutdown,
            events,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            event_rx,
        )
    }

    /// Start the drain routine and the first connect cycle
    pub fn start(&self) -> JoinHandle<()> {
        let client = self.clone();
        let drain = tokio::spawn(async move { client.drain_loop().await });
        self.trigger_reconnect();
        drain
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Attempts made in the current cycle (0 once connected)
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Attempts made over the client's lifetime
    pub fn total_attempts(&self) -> u64 {
        self.shared.total_attempts.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Encode and enqueue a frame without waiting for delivery
    pub fn send(&self, frame: &ControlFrame) -> Result<(), SendError> {
        let encoded = control::encode(frame)?;
        if !self.shared.queue.push(encoded) {
            let capacity = self.shared.queue.capacity();
            warn!(kind = %frame.kind, capacity, "Send queue full, dropping frame");
            return Err(SendError::QueueFull(capacity));
        }
        self.shared.drain.notify_one();
        Ok(())
    }

    /// Run one reconnect cycle
    ///
    /// Returns true once connected. Returns false when the attempt budget is
    /// spent or another cycle is already running.
    pub async fn connect(&self) -> bool {
        let Ok(_cycle) = self.shared.cycle.try_lock() else {
            debug!("Reconnect cycle already in progress");
            return false;
        };
        if self.state() == ConnectionState::Connected {
            return true;
        }

        let max = self.shared.config.max_reconnect_attempts;
        let target = self.shared.connector.target();
        let transport = self.shared.connector.name();
        self.shared.state.send_replace(ConnectionState::Connecting);
        self.shared.attempts.store(0, Ordering::SeqCst);

        for attempt in 1..=max {
            if *self.shared.shutdown.borrow() {
                break;
            }
            self.shared.attempts.store(attempt, Ordering::SeqCst);
            self.shared.total_attempts.fetch_add(1, Ordering::SeqCst);

            match self.shared.connector.connect().await {
                Ok(stream) => match self.install(stream).await {
                    Ok(()) => {
                        self.shared.attempts.store(0, Ordering::SeqCst);
                        self.shared.state.send_replace(ConnectionState::Connected);
                        info!(%transport, %target, attempt, "Connected to coordinator");
                        self.emit(ConnectionEvent::Connected);
                        self.shared.drain.notify_one();
                        return true;
                    }
                    Err(e) => warn!(attempt, max, %target, error = %e, "Handshake failed"),
                },
                Err(e) => warn!(attempt, max, %target, error = %e, "Coordinator connect failed"),
            }

            if attempt < max {
                sleep(self.shared.config.retry_interval).await;
            }
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
        error!(attempts = max, %target, "Reconnect cycle exhausted, waiting for next trigger");
        self.emit(ConnectionEvent::ReconnectExhausted { attempts: max });
        false
    }

    /// Poll the coordinator for the node roster on a fixed period
    ///
    /// While disconnected each poll also restarts the reconnect cycle.
    pub fn spawn_roster_poll(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut shutdown = client.shared.shutdown.subscribe();
            let mut ticker = interval(client.shared.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = client.send(&ControlFrame::command("node_info", "")) {
                            debug!(error = %e, "Roster poll not queued");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Stop all client tasks and close the link
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        if let Some(task) = self.shared.receiver.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!(pending = self.queued(), "Coordinator client stopped");
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.shared.events.try_send(event) {
            debug!(error = %e, "Connection event not delivered");
        }
    }

    fn trigger_reconnect(&self) {
        if *self.shared.shutdown.borrow() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            client.connect().await;
        });
    }

    /// Write the handshake, then publish the writer and start receiving
    async fn install(&self, stream: C::Stream) -> Result<()> {
        let (reader, mut writer) = tokio::io::split(stream);
        let handshake = control::encode(&self.shared.config.handshake)?;
        writer.write_all(&handshake).await?;

        let generation = {
            let mut slot = self.shared.writer.lock().await;
            *slot = Some(writer);
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let client = self.clone();
        let task = tokio::spawn(async move { client.receive_loop(reader, generation).await });
        if let Some(previous) = self.shared.receiver.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn drain_loop(self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = self.shared.drain.notified() => self.flush().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Write queued frames one at a time, in order
    async fn flush(&self) {
        while let Some(frame) = self.shared.queue.pop() {
            let mut slot = self.shared.writer.lock().await;
            let Some(writer) = slot.as_mut() else {
                drop(slot);
                debug!(attempts = self.attempts(), "Coordinator not connected, holding frame");
                self.shared.queue.push_front(frame);
                self.trigger_reconnect();
                return;
            };

            if let Err(e) = writer.write_all(&frame).await {
                let generation = self.shared.generation.load(Ordering::SeqCst);
                drop(slot);
                self.shared.queue.push_front(frame);
                self.connection_lost(generation, format!("Write error: {e}")).await;
                return;
            }
        }
    }

    async fn receive_loop(self, mut reader: ReadHalf<C::Stream>, generation: u64) {
        let mut decoder = ControlDecoder::new();
        let mut buf = vec![0u8; self.shared.config.read_buffer_size];

        let reason = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break "Coordinator closed the connection".to_string(),
                Ok(n) => n,
                Err(e) => break format!("Read error: {e}"),
            };
            decoder.extend(&buf[..n]);

            loop {
                match decoder.decode_next() {
                    Ok(Some(frame)) => {
                        let event = ConnectionEvent::Received(frame);
                        if self.shared.events.send(event).await.is_err() {
                            debug!("Event receiver dropped, discarding frame");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            error = %e,
                            buffered = decoder.buffer_len(),
                            "Undecodable data from coordinator, clearing buffer"
                        );
                        decoder.clear();
                        break;
                    }
                }
            }
        };

        self.connection_lost(generation, reason).await;
    }

    async fn connection_lost(&self, generation: u64, reason: String) {
        {
            let mut slot = self.shared.writer.lock().await;
            if self.shared.generation.load(Ordering::SeqCst) != generation || slot.is_none() {
                return;
            }
            *slot = None;
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
        warn!(%reason, "Coordinator connection lost");
        self.emit(ConnectionEvent::Disconnected { reason });
        self.trigger_reconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TcpConnector, TransportStream};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    struct FailingConnector {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportConnector for FailingConnector {
        type Stream = TcpStream;

        async fn connect(&self) -> Result<Self::Stream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("connection refused"))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }

        fn target(&self) -> &str {
            "nowhere:0"
        }
    }

    /// In-memory link whose writes start failing after a set number of calls
    struct FlakyStream {
        inner: DuplexStream,
        writes_left: Option<usize>,
    }

    impl AsyncRead for FlakyStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FlakyStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if let Some(left) = self.writes_left.as_mut() {
                if *left == 0 {
                    return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
                }
                *left -= 1;
            }
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    #[async_trait]
    impl TransportStream for FlakyStream {
        async fn shutdown(&mut self) -> Result<()> {
            AsyncWriteExt::shutdown(&mut self.inner).await?;
            Ok(())
        }
    }

    /// Hands out prepared links, one per permit granted by the test
    struct ScriptedConnector {
        links: parking_lot::Mutex<VecDeque<FlakyStream>>,
        permits: Arc<Semaphore>,
    }

    #[async_trait]
    impl TransportConnector for ScriptedConnector {
        type Stream = FlakyStream;

        async fn connect(&self) -> Result<Self::Stream> {
            self.permits.acquire().await?.forget();
            self.links
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow!("no link left"))
        }

        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn target(&self) -> &str {
            "scripted:0"
        }
    }

    fn fast_config(addr: &str) -> ClientConfig {
        ClientConfig {
            coordinator_addr: addr.into(),
            retry_interval: Duration::from_millis(1),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn tcp_client(
        addr: &str,
    ) -> (CoordinatorClient<TcpConnector>, mpsc::Receiver<ConnectionEvent>) {
        let config = fast_config(addr);
        let connector = TcpConnector::new(config.coordinator_addr.clone(), config.connect_timeout);
        CoordinatorClient::new(config, connector)
    }

    async fn read_frame(socket: &mut TcpStream, decoder: &mut ControlDecoder) -> ControlFrame {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = decoder.decode_next().unwrap() {
                return frame;
            }
            let n = timeout(Duration::from_secs(5), socket.read(&mut buf))
                .await
                .expect("frame not received in time")
                .unwrap();
            assert!(n > 0, "client closed unexpectedly");
            decoder.extend(&buf[..n]);
        }
    }

    async fn read_link_frame(
        peer: &mut DuplexStream,
        decoder: &mut ControlDecoder,
    ) -> ControlFrame {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = decoder.decode_next().unwrap() {
                return frame;
            }
            let n = timeout(Duration::from_secs(5), peer.read(&mut buf))
                .await
                .expect("frame not received in time")
                .unwrap();
            assert!(n > 0, "client closed unexpectedly");
            decoder.extend(&buf[..n]);
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event in time")
            .expect("event channel closed")
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.coordinator_addr, "192.168.31.35:5007");
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.retry_interval, Duration::from_millis(30));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.handshake.kind, "start_all");
    }

    #[tokio::test]
    async fn test_reconnect_cycle_is_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = FailingConnector { calls: calls.clone() };
        let (client, mut events) = CoordinatorClient::new(fast_config("nowhere:0"), connector);
        client.start();

        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::ReconnectExhausted { attempts: 5 }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(client.attempts(), 5);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Nothing retries on its own after the cycle ends
        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // The next send starts a fresh cycle and keeps the frame queued
        client.send(&ControlFrame::command("node_info", "")).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::ReconnectExhausted { attempts: 5 }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(client.total_attempts(), 10);
        assert_eq!(client.queued(), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_frame_is_redelivered_before_newer_ones() {
        let (first_link, _first_peer) = duplex(64 * 1024);
        let (second_link, mut second_peer) = duplex(64 * 1024);
        let permits = Arc::new(Semaphore::new(1));
        let connector = ScriptedConnector {
            links: parking_lot::Mutex::new(VecDeque::from([
                // Only the handshake gets through on the first link
                FlakyStream {
                    inner: first_link,
                    writes_left: Some(1),
                },
                FlakyStream {
                    inner: second_link,
                    writes_left: None,
                },
            ])),
            permits: permits.clone(),
        };
        let (client, mut events) = CoordinatorClient::new(fast_config("scripted:0"), connector);
        client.start();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        client
            .send(&ControlFrame::command("create_tasks", "first"))
            .unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));

        // Queued while the reconnect is held back
        client
            .send(&ControlFrame::command("create_tasks", "second"))
            .unwrap();
        client
            .send(&ControlFrame::command("create_tasks", "third"))
            .unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(client.queued(), 3);

        permits.add_permits(1);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        let mut decoder = ControlDecoder::new();
        let handshake = read_link_frame(&mut second_peer, &mut decoder).await;
        assert_eq!(handshake.kind, "start_all");
        for expected in ["first", "second", "third"] {
            let frame = read_link_frame(&mut second_peer, &mut decoder).await;
            assert_eq!(frame.content, serde_json::json!(expected));
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let mut config = fast_config("nowhere:0");
        config.queue_capacity = 2;
        let connector = FailingConnector {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let (client, _events) = CoordinatorClient::new(config, connector);

        let frame = ControlFrame::command("node_info", "");
        assert!(client.send(&frame).is_ok());
        assert!(client.send(&frame).is_ok());
        assert!(matches!(client.send(&frame), Err(SendError::QueueFull(2))));
        assert_eq!(client.queued(), 2);
    }

    #[tokio::test]
    async fn test_handshake_then_queued_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, mut events) = tcp_client(&addr);

        for i in 0..3 {
            client
                .send(&ControlFrame::command("create_tasks", format!("task {i}")))
                .unwrap();
        }
        client.start();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut decoder = ControlDecoder::new();
        let handshake = read_frame(&mut socket, &mut decoder).await;
        assert_eq!(handshake, ControlFrame::command("start_all", "30"));

        for i in 0..3 {
            let frame = read_frame(&mut socket, &mut decoder).await;
            assert_eq!(frame.content, serde_json::json!(format!("task {i}")));
        }
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(client.state(), ConnectionState::Connected);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_receives_prefixed_and_bare_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, mut events) = tcp_client(&addr);
        client.start();

        let (mut socket, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        let prefixed = control::encode(&ControlFrame::command("cluster_info", "")).unwrap();
        socket.write_all(&prefixed).await.unwrap();
        socket
            .write_all(br#"{"type":"tasks_info","content":{"nodeA":["t1"]}}"#)
            .await
            .unwrap();

        let ConnectionEvent::Received(first) = next_event(&mut events).await else {
            panic!("expected a frame");
        };
        assert_eq!(first.kind, "cluster_info");
        let ConnectionEvent::Received(second) = next_event(&mut events).await else {
            panic!("expected a frame");
        };
        assert_eq!(second.kind, "tasks_info");

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, mut events) = tcp_client(&addr);
        client.start();

        let (first, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        drop(first);

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));

        let (mut second, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client did not reconnect")
            .unwrap();
        let handshake = read_frame(&mut second, &mut ControlDecoder::new()).await;
        assert_eq!(handshake.kind, "start_all");
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_roster_poll_sends_node_info() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut config = fast_config(&addr);
        config.poll_interval = Duration::from_millis(20);
        let connector = TcpConnector::new(addr.clone(), config.connect_timeout);
        let (client, _events) = CoordinatorClient::new(config, connector);
        client.start();
        client.spawn_roster_poll();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut decoder = ControlDecoder::new();
        assert_eq!(read_frame(&mut socket, &mut decoder).await.kind, "start_all");
        let poll = read_frame(&mut socket, &mut decoder).await;
        assert_eq!(poll, ControlFrame::command("node_info", ""));

        client.shutdown().await;
    }
}

//! Individual worker session handling

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarmlink_shared::codec::{CodecError, HeaderDecoder};
use swarmlink_shared::{ImageTransferDescriptor, ProtocolError, TransferFrame, TransferMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::handler::ReportHandler;
use super::manager::{ListenerConfig, ListenerStats};

/// Failure while receiving a declared payload
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Declared size {declared} outside 1..={max} bytes")]
    SizeOutOfBounds { declared: i64, max: u64 },

    #[error("Stream closed after {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },

    #[error("Timed out after {received} of {expected} bytes")]
    Timeout { received: usize, expected: usize },

    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that ends a worker connection
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No data for {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header types that are followed by a binary body
fn carries_payload(kind: &str) -> bool {
    matches!(kind, "single_image" | "image_data")
}

/// One accepted worker connection
///
/// Reads a header, handles it (streaming the payload for image types) and
/// goes back to waiting for the next header until the peer closes.
pub struct WorkerSession<R> {
    peer: SocketAddr,
    reader: R,
    decoder: HeaderDecoder,
    read_buf: Vec<u8>,
    config: Arc<ListenerConfig>,
    handler: ReportHandler,
    stats: Arc<ListenerStats>,
}

impl<R: AsyncRead + Unpin> WorkerSession<R> {
    pub fn new(
        peer: SocketAddr,
        reader: R,
        config: Arc<ListenerConfig>,
        handler: ReportHandler,
        stats: Arc<ListenerStats>,
    ) -> Self {
        Self {
            peer,
            reader,
            decoder: HeaderDecoder::new(),
            read_buf: vec![0u8; config.buffer_size],
            config,
            handler,
            stats,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Give back the underlying stream once the session is over
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Process frames until the peer closes or something fails
    pub async fn run(&mut self) -> Result<(), SessionError> {
        while let Some(frame) = self.next_header().await? {
            self.process(frame).await?;
        }
        Ok(())
    }

    /// Read until a header is decoded; `None` on a clean close
    async fn next_header(&mut self) -> Result<Option<TransferFrame>, SessionError> {
        loop {
            if let Some(frame) = self.decoder.decode_next()? {
                return Ok(Some(frame));
            }

            let read_timeout = self.config.read_timeout;
            let n = timeout(read_timeout, self.reader.read(&mut self.read_buf))
                .await
                .map_err(|_| SessionError::Timeout(read_timeout))??;

            if n == 0 {
                if self.decoder.buffer_len() > 0 {
                    debug!(
                        peer = %self.peer,
                        pending = self.decoder.buffer_len(),
                        "Peer closed with an unterminated header"
                    );
                }
                return Ok(None);
            }

            self.stats.add_bytes(n as u64);
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    async fn process(&mut self, frame: TransferFrame) -> Result<(), SessionError> {
        let kind = frame.kind.clone();
        let message = match TransferMessage::try_from(frame) {
            Ok(message) => message,
            // Body length unknown, the stream can no longer be framed
            Err(e) if carries_payload(&kind) => return Err(e.into()),
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Dropping malformed frame");
                return Ok(());
            }
        };

        match message {
            TransferMessage::SingleImage(desc) => self.receive_image(desc).await?,
            TransferMessage::ImageData {
                transfer: Some(desc),
                ..
            } => self.receive_image(desc).await?,
            TransferMessage::ImageData {
                task_id,
                subtask_name,
                image_count,
                transfer: None,
            } => {
                info!(
                    peer = %self.peer,
                    %task_id,
                    %subtask_name,
                    image_count,
                    "Image batch announced"
                );
            }
            TransferMessage::TaskInfo(report) | TransferMessage::TaskResult(report) => {
                if let Err(e) = self.handler.complete(&report).await {
                    warn!(
                        peer = %self.peer,
                        subtask = %report.subtask_name,
                        error = %e,
                        "Dropping completion report"
                    );
                }
            }
            TransferMessage::Unknown(kind) => {
                warn!(peer = %self.peer, %kind, "Unknown message type, dropping");
            }
        }

        Ok(())
    }

    async fn receive_image(&mut self, desc: ImageTransferDescriptor) -> Result<(), SessionError> {
        let max = self.config.max_image_size;
        if desc.declared_size <= 0 || desc.declared_size as u64 > max {
            return Err(TransferError::SizeOutOfBounds {
                declared: desc.declared_size,
                max,
            }
            .into());
        }

        let payload = self.read_payload(desc.declared_size as usize).await?;
        self.stats.add_image();

        if let Err(e) = self.handler.store_image(&desc, payload).await {
            warn!(
                peer = %self.peer,
                subtask = %desc.subtask_name,
                file = %desc.file_name,
                error = %e,
                "Received image has no matching subtask, discarding"
            );
        }
        Ok(())
    }

    /// Read exactly `size` body bytes, starting with what header decoding
    /// already pulled off the socket
    async fn read_payload(&mut self, size: usize) -> Result<Bytes, TransferError> {
        let large = size as u64 > self.config.large_transfer_threshold;
        let (read_timeout, chunk) = if large {
            debug!(peer = %self.peer, size, "Large transfer, widening timeout and buffer");
            (self.config.large_read_timeout, self.config.large_buffer_size)
        } else {
            (self.config.read_timeout, self.config.buffer_size)
        };

        let mut payload = BytesMut::with_capacity(size);
        payload.extend_from_slice(&self.decoder.take_payload(size));

        if self.read_buf.len() < chunk {
            self.read_buf.resize(chunk, 0);
        }

        while payload.len() < size {
            let want = (size - payload.len()).min(chunk);
            let read = self.reader.read(&mut self.read_buf[..want]);
            let n = match timeout(read_timeout, read).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TransferError::Timeout {
                        received: payload.len(),
                        expected: size,
                    })
                }
            };

            if n == 0 {
                return Err(TransferError::Truncated {
                    received: payload.len(),
                    expected: size,
                });
            }

            self.stats.add_bytes(n as u64);
            payload.extend_from_slice(&self.read_buf[..n]);
        }

        Ok(payload.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_shared::codec::transfer::encode_header;
    use swarmlink_shared::{InMemoryStore, MainTask, SubTask, TaskStore};
    use tokio::io::{duplex, AsyncWriteExt};

    struct Fixture {
        store: Arc<InMemoryStore>,
        task: MainTask,
        stats: Arc<ListenerStats>,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let task = MainTask::new("scan", "scan the quarry");
            store.add_main_task(task.clone()).await.unwrap();
            store
                .add_subtask(SubTask::new(task.id, subtask_name(&task)))
                .await
                .unwrap();
            Self {
                store,
                task,
                stats: Arc::new(ListenerStats::default()),
            }
        }

        fn session<R: AsyncRead + Unpin>(&self, reader: R) -> WorkerSession<R> {
            WorkerSession::new(
                "127.0.0.1:5009".parse().unwrap(),
                reader,
                Arc::new(ListenerConfig::default()),
                ReportHandler::new(self.store.clone()),
                self.stats.clone(),
            )
        }

        fn image_header(&self, size: i64) -> Bytes {
            let frame = TransferFrame::new("single_image")
                .field("task_id", self.task.id.to_string())
                .field("subtask_name", subtask_name(&self.task))
                .field("image_index", 0)
                .field("total_images", 1)
                .field("filename", "shot.png")
                .field("filesize", size);
            encode_header(&frame).unwrap()
        }

        async fn images(&self) -> usize {
            let subs = self.store.get_subtasks_by_parent(self.task.id).await;
            subs[0].images.len()
        }
    }

    fn subtask_name(task: &MainTask) -> String {
        format!("{}_0_0", task.id)
    }

    #[tokio::test]
    async fn test_payload_across_many_reads() {
        let fx = Fixture::new().await;
        let (mut client, server) = duplex(64);
        let header = fx.image_header(1000);

        let writer = tokio::spawn(async move {
            client.write_all(&header).await.unwrap();
            for chunk in vec![7u8; 1000].chunks(37) {
                client.write_all(chunk).await.unwrap();
            }
        });

        let mut session = fx.session(server);
        session.run().await.expect("session should end cleanly");
        writer.await.unwrap();

        let subs = fx.store.get_subtasks_by_parent(fx.task.id).await;
        assert_eq!(subs[0].images.len(), 1);
        assert_eq!(subs[0].images[0].file_size, 1000);
        assert_eq!(fx.stats.snapshot().total_images, 1);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error() {
        let fx = Fixture::new().await;
        let (mut client, server) = duplex(4096);
        client.write_all(&fx.image_header(1000)).await.unwrap();
        client.write_all(&[1u8; 500]).await.unwrap();
        drop(client);

        let result = fx.session(server).run().await;
        assert!(matches!(
            result,
            Err(SessionError::Transfer(TransferError::Truncated {
                received: 500,
                expected: 1000
            }))
        ));
        assert_eq!(fx.images().await, 0);
    }

    #[tokio::test]
    async fn test_header_and_payload_in_one_write() {
        let fx = Fixture::new().await;
        let mut wire = fx.image_header(4).to_vec();
        wire.extend_from_slice(b"abcd");
        wire.extend_from_slice(&fx.image_header(2));
        wire.extend_from_slice(b"ef");

        fx.session(&wire[..]).run().await.unwrap();

        let subs = fx.store.get_subtasks_by_parent(fx.task.id).await;
        assert_eq!(subs[0].images.len(), 2);
        let sizes: Vec<_> = subs[0].images.iter().map(|i| i.file_size).collect();
        assert!(sizes.contains(&4) && sizes.contains(&2));
    }

    #[tokio::test]
    async fn test_size_out_of_bounds_is_rejected_before_reading() {
        let fx = Fixture::new().await;
        let wire = fx.image_header(0);

        let result = fx.session(&wire[..]).run().await;
        assert!(matches!(
            result,
            Err(SessionError::Transfer(TransferError::SizeOutOfBounds { declared: 0, .. }))
        ));

        let too_big = fx.image_header(101 * 1024 * 1024);
        let result = fx.session(&too_big[..]).run().await;
        assert!(matches!(
            result,
            Err(SessionError::Transfer(TransferError::SizeOutOfBounds { .. }))
        ));
    }

    #[tokio::test]
    async fn test_task_result_and_unknown_types_on_one_connection() {
        let fx = Fixture::new().await;
        let mut wire = Vec::new();
        wire.extend_from_slice(b"{\"type\":\"heartbeat\",\"content\":{}}\n");
        wire.extend_from_slice(b"garbage line\n");
        let result = TransferFrame::new("task_result")
            .field("task_id", fx.task.id.to_string())
            .field("subtask_name", subtask_name(&fx.task))
            .field("result", "ok");
        wire.extend_from_slice(&encode_header(&result).unwrap());

        fx.session(&wire[..]).run().await.unwrap();

        let parent = fx.store.get_main_task(fx.task.id).await.unwrap();
        assert!(parent.subtasks[0].is_complete());
        assert_eq!(parent.status, swarmlink_shared::TaskStatus::RanToCompletion);
    }

    #[tokio::test]
    async fn test_single_image_without_filesize_closes() {
        let fx = Fixture::new().await;
        let frame = TransferFrame::new("single_image")
            .field("task_id", fx.task.id.to_string())
            .field("subtask_name", subtask_name(&fx.task));
        let wire = encode_header(&frame).unwrap();

        let result = fx.session(&wire[..]).run().await;
        assert!(matches!(result, Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_announcement_only_image_data() {
        let fx = Fixture::new().await;
        let frame = TransferFrame::new("image_data")
            .field("task_id", fx.task.id.to_string())
            .field("subtask_name", subtask_name(&fx.task))
            .field("image_count", 3);
        let wire = encode_header(&frame).unwrap();

        fx.session(&wire[..]).run().await.unwrap();
        assert_eq!(fx.images().await, 0);
    }
}

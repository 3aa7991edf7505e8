//! Swarmlink Shared Protocol Types
//!
//! This crate provides the wire types, both frame codecs and the task/drone
//! model shared by the ingestion server and the coordinator gateway.

pub mod codec;
pub mod message;
pub mod model;
pub mod store;

// Re-export commonly used types at crate root
pub use message::{
    ControlFrame, CoordinatorMessage, ImageTransferDescriptor, ProtocolError, TransferFrame,
    TransferMessage,
};
pub use model::{Drone, DroneStatus, MainTask, Position, SubTask, SubTaskImage, TaskStatus};
pub use store::{
    find_subtask_by_name, ChangeKind, DroneEvent, DroneRegistry, InMemoryStore, StoreError,
    TaskEvent, TaskStore,
};

/// Transport limits and default timings for both services
pub mod limits {
    /// Largest header (ingestion) or JSON frame (command channel) accepted
    pub const MAX_HEADER_SIZE: usize = 1024 * 1024;

    /// Largest image payload a worker may declare
    pub const MAX_IMAGE_SIZE: u64 = 100 * 1024 * 1024;

    /// Declared sizes above this switch the session into large-transfer mode (10 MiB)
    pub const LARGE_TRANSFER_THRESHOLD: u64 = 10 * 1024 * 1024;

    /// Read timeout for control frames
    pub const RECEIVE_TIMEOUT_MS: u64 = 120_000;

    /// Write timeout on ingestion sockets
    pub const SEND_TIMEOUT_MS: u64 = 60_000;

    /// Read timeout while streaming a large transfer
    pub const LARGE_TRANSFER_TIMEOUT_MS: u64 = 300_000;

    /// Read chunk size for control frames
    pub const BUFFER_SIZE: usize = 64 * 1024;

    /// Read chunk size while streaming a large transfer
    pub const LARGE_TRANSFER_BUFFER_SIZE: usize = 128 * 1024;

    /// Concurrent ingestion connections serviced at once
    pub const MAX_CONCURRENT_CONNECTIONS: usize = 50;

    /// Outbound frames held while the coordinator is unreachable
    pub const SEND_QUEUE_CAPACITY: usize = 1000;

    /// Connect attempts per reconnect cycle
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Pause between connect attempts
    pub const RECONNECT_INTERVAL_MS: u64 = 30;

    /// Roster poll period on the command channel
    pub const ROSTER_POLL_INTERVAL_MS: u64 = 5_000;

    /// Statistics report period on the ingestion side
    pub const STATS_INTERVAL_MS: u64 = 30_000;
}

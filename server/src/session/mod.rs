//! Worker ingestion sessions
//!
//! This module handles:
//! - Accepting worker connections under a concurrency cap
//! - Reading newline-terminated headers and their binary bodies
//! - Applying image and completion reports to the task store
//! - Periodic transfer statistics

mod connection;
mod handler;
mod manager;

pub use connection::{SessionError, TransferError, WorkerSession};
pub use handler::{Completion, ReportHandler};
pub use manager::{IngestListener, ListenerConfig, ListenerHandle, ListenerStats, StatsSnapshot};

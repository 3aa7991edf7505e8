//! Swarmlink ingestion server
//!
//! Receives status reports and streamed images from drones and hands them to
//! a [`swarmlink_shared::TaskStore`].

pub mod session;

pub use session::{IngestListener, ListenerConfig, ListenerHandle, StatsSnapshot};

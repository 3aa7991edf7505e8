//! Command channel to the coordinator
//!
//! This module handles:
//! - One persistent connection with bounded reconnect cycles
//! - A bounded, drop-newest outbound queue drained by a single writer
//! - Incremental decoding of inbound control frames
//! - Forwarding store change events as outgoing commands

mod bridge;
mod manager;
mod queue;

pub use bridge::run_event_bridge;
pub use manager::{ClientConfig, ConnectionEvent, CoordinatorClient};

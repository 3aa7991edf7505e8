//! Handling of frames received from the coordinator
//!
//! This module handles:
//! - Typed decoding of each frame at the boundary
//! - Routing by message type to a domain handler
//! - Logging every outcome; nothing is raised back to the receive loop

mod dispatcher;
pub mod handlers;

pub use dispatcher::{CommandResult, Dispatcher};

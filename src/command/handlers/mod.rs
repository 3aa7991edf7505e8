//! Domain handlers for coordinator messages

mod assignment;
mod cluster;
mod reassign;
mod roster;
mod subtasks;

pub use assignment::handle_task_assignment;
pub use cluster::handle_cluster_info;
pub use reassign::handle_reassignment;
pub use roster::handle_roster;
pub use subtasks::handle_subtask_creation;

use crate::command::CommandResult;
use std::sync::Arc;
use swarmlink_shared::{DroneRegistry, TaskStore};

/// Collaborators shared by every handler
#[derive(Clone)]
pub struct HandlerContext {
    pub tasks: Arc<dyn TaskStore>,
    pub drones: Arc<dyn DroneRegistry>,
}

/// Per-item bookkeeping for handlers that walk a list
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tally {
    pub applied: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn applied(&mut self) {
        self.applied += 1;
    }

    pub fn skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn into_result(self, what: &str) -> CommandResult {
        if self.skipped == 0 {
            CommandResult::Completed {
                message: format!("{} {}", self.applied, what),
            }
        } else {
            CommandResult::Partial {
                applied: self.applied,
                skipped: self.skipped,
            }
        }
    }
}

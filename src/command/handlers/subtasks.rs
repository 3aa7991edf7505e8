//! Subtask creation handler (`Subtasks_info`)

use super::{HandlerContext, Tally};
use crate::command::CommandResult;
use std::collections::HashSet;
use swarmlink_shared::model::parent_of_group;
use swarmlink_shared::SubTask;
use tracing::{debug, info, warn};

/// Create the subtasks of each group that the parent does not have yet
pub async fn handle_subtask_creation(
    ctx: &HandlerContext,
    groups: &[(String, Vec<String>)],
) -> CommandResult {
    let mut tally = Tally::default();

    for (group, names) in groups {
        let Some(parent_id) = parent_of_group(group) else {
            warn!(%group, "Group key does not carry a task id");
            tally.skipped();
            continue;
        };
        let Some(parent) = ctx.tasks.get_main_task(parent_id).await else {
            warn!(%group, task = %parent_id, "Main task not found, subtasks not added");
            tally.skipped();
            continue;
        };

        // Names already under the parent, plus those created from this list
        let mut known: HashSet<String> =
            parent.subtasks.into_iter().map(|s| s.description).collect();
        let mut created = 0;
        for name in names {
            if known.contains(name) {
                debug!(subtask = %name, "Subtask already exists");
                continue;
            }
            match ctx.tasks.add_subtask(SubTask::new(parent_id, name.clone())).await {
                Ok(()) => {
                    known.insert(name.clone());
                    created += 1;
                    tally.applied();
                }
                Err(e) => {
                    warn!(subtask = %name, error = %e, "Subtask not added");
                    tally.skipped();
                }
            }
        }
        info!(%group, task = %parent_id, created, "Subtask group registered");
    }

    tally.into_result("subtasks created")
}

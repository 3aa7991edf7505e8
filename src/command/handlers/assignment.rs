//! Task assignment handler (`tasks_info`)

use super::{HandlerContext, Tally};
use crate::command::CommandResult;
use chrono::Utc;
use swarmlink_shared::{find_subtask_by_name, TaskStatus};
use tracing::{info, warn};

/// Assign each listed subtask to the node it is keyed under
pub async fn handle_task_assignment(
    ctx: &HandlerContext,
    assignments: &[(String, Vec<String>)],
) -> CommandResult {
    let mut tally = Tally::default();

    for (node, subtasks) in assignments {
        info!(%node, count = subtasks.len(), "Assigning subtasks");
        let drone = ctx.drones.get_drone_by_name(node).await;

        for name in subtasks {
            let mut subtask = match find_subtask_by_name(ctx.tasks.as_ref(), None, name).await {
                Ok(subtask) => subtask,
                Err(e) => {
                    warn!(%node, subtask = %name, error = %e, "Cannot assign subtask");
                    tally.skipped();
                    continue;
                }
            };

            subtask.assigned_drone = Some(node.clone());
            subtask.status = TaskStatus::Running;
            subtask.assigned_time = Some(Utc::now());
            let subtask_id = subtask.id;
            if let Err(e) = ctx.tasks.update_subtask(subtask).await {
                warn!(subtask = %name, error = %e, "Subtask update failed");
                tally.skipped();
                continue;
            }

            let Some(drone) = drone.as_ref() else {
                warn!(
                    %node,
                    subtask = %name,
                    "Drone not in registry, subtask marked but not attached"
                );
                tally.skipped();
                continue;
            };
            match ctx.drones.assign_subtask_to_drone(drone.id, subtask_id).await {
                Ok(()) => tally.applied(),
                Err(e) => {
                    warn!(%node, subtask = %name, error = %e, "Drone assignment failed");
                    tally.skipped();
                }
            }
        }
    }

    tally.into_result("subtasks assigned")
}

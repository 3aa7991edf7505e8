//! Reassignment handler (`reassign_info`)

use super::{HandlerContext, Tally};
use crate::command::CommandResult;
use swarmlink_shared::message::Reassignment;
use swarmlink_shared::{find_subtask_by_name, StoreError};
use tracing::{info, warn};
use uuid::Uuid;

/// Move each subtask from its old node to its new one
pub async fn handle_reassignment(ctx: &HandlerContext, moves: &[Reassignment]) -> CommandResult {
    let mut tally = Tally::default();

    for item in moves {
        match reassign(ctx, item).await {
            Ok(()) => {
                info!(
                    subtask = %item.subtask_name,
                    from = %item.old_node,
                    to = %item.new_node,
                    "Subtask reassigned"
                );
                tally.applied();
            }
            Err(e) => {
                warn!(subtask = %item.subtask_name, error = %e, "Reassignment skipped");
                tally.skipped();
            }
        }
    }

    tally.into_result("subtasks reassigned")
}

async fn reassign(ctx: &HandlerContext, item: &Reassignment) -> Result<(), StoreError> {
    let task_id =
        Uuid::parse_str(&item.task_id).map_err(|_| StoreError::InvalidId(item.task_id.clone()))?;
    let subtask =
        find_subtask_by_name(ctx.tasks.as_ref(), Some(task_id), &item.subtask_name).await?;
    let new_drone = ctx
        .drones
        .get_drone_by_name(&item.new_node)
        .await
        .ok_or_else(|| StoreError::not_found("drone", &item.new_node))?;

    ctx.tasks.reassign_subtask(subtask.id, &item.new_node).await?;

    if let Some(old) = ctx.drones.get_drone_by_name(&item.old_node).await {
        ctx.drones.unassign_subtask_from_drone(old.id, subtask.id).await?;
    }
    ctx.drones.assign_subtask_to_drone(new_drone.id, subtask.id).await
}

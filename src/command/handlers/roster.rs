//! Node roster handler (`ans_node_info`, `node_info`, `start_success`)

use super::HandlerContext;
use crate::command::CommandResult;
use swarmlink_shared::message::NodeReport;
use swarmlink_shared::model::DEFAULT_RADIUS;
use swarmlink_shared::{Drone, Position};

fn to_drone(node: NodeReport) -> Drone {
    let mut drone = Drone::new(node.name);
    drone.position = Some(Position::new(node.x, node.y));
    drone.cpu_used_rate = node.cpu_used_rate;
    drone.memory = node.memory;
    drone.left_bandwidth = node.left_bandwidth;
    drone.radius = node.radius.unwrap_or(DEFAULT_RADIUS);
    drone
}

/// Merge the reported roster into the drone registry
pub async fn handle_roster(ctx: &HandlerContext, nodes: Vec<NodeReport>) -> CommandResult {
    let drones: Vec<Drone> = nodes
        .into_iter()
        .filter(|n| !n.name.is_empty())
        .map(to_drone)
        .collect();
    let count = drones.len();

    ctx.drones.set_drones(drones).await;

    CommandResult::Completed {
        message: format!("Roster refreshed with {count} drones"),
    }
}

//! Dispatcher - decodes coordinator frames and routes them to handlers

use super::handlers::{self, HandlerContext};
use std::sync::Arc;
use swarmlink_shared::{ControlFrame, CoordinatorMessage, DroneRegistry, TaskStore};
use tracing::{debug, info, warn};

/// Result of handling one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Every item in the frame was applied
    Completed { message: String },
    /// Some items referenced missing or malformed entities and were skipped
    Partial { applied: usize, skipped: usize },
    /// Nothing applied: unknown type or malformed content
    Rejected { message: String },
}

/// Routes coordinator frames by type
pub struct Dispatcher {
    ctx: HandlerContext,
}

impl Dispatcher {
    pub fn new(tasks: Arc<dyn TaskStore>, drones: Arc<dyn DroneRegistry>) -> Self {
        Self {
            ctx: HandlerContext { tasks, drones },
        }
    }

    /// Apply one frame; failures are logged and never returned as errors
    pub async fn dispatch(&self, frame: &ControlFrame) -> CommandResult {
        let message = match CoordinatorMessage::try_from(frame) {
            Ok(message) => message,
            Err(e) => {
                let result = CommandResult::Rejected {
                    message: e.to_string(),
                };
                log_result(&frame.kind, &result);
                return result;
            }
        };

        let result = match message {
            CoordinatorMessage::NodeRoster(nodes) => {
                handlers::handle_roster(&self.ctx, nodes).await
            }
            CoordinatorMessage::TaskAssignment(assignments) => {
                handlers::handle_task_assignment(&self.ctx, &assignments).await
            }
            CoordinatorMessage::SubtaskCreation(groups) => {
                handlers::handle_subtask_creation(&self.ctx, &groups).await
            }
            CoordinatorMessage::Reassignment(moves) => {
                handlers::handle_reassignment(&self.ctx, &moves).await
            }
            CoordinatorMessage::ClusterInfo(clusters) => handlers::handle_cluster_info(&clusters),
            CoordinatorMessage::Unknown(kind) => CommandResult::Rejected {
                message: format!("Unknown message type: {kind}"),
            },
        };

        log_result(&frame.kind, &result);
        result
    }
}

fn log_result(kind: &str, result: &CommandResult) {
    match result {
        CommandResult::Completed { message } => debug!(%kind, %message, "Frame applied"),
        CommandResult::Partial { applied, skipped } => {
            info!(%kind, applied, skipped, "Frame partially applied")
        }
        CommandResult::Rejected { message } => warn!(%kind, %message, "Frame dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarmlink_shared::{Drone, InMemoryStore, MainTask, SubTask, TaskStatus};

    struct Fixture {
        store: Arc<InMemoryStore>,
        dispatcher: Dispatcher,
        task: MainTask,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let task = MainTask::new("survey", "survey the ridge");
        store.add_main_task(task.clone()).await.unwrap();
        for i in 1..=2 {
            store
                .add_subtask(SubTask::new(task.id, format!("{}_0_{}", task.id, i)))
                .await
                .unwrap();
        }
        store
            .set_drones(vec![Drone::new("nodeA"), Drone::new("nodeB")])
            .await;

        Fixture {
            dispatcher: Dispatcher::new(store.clone(), store.clone()),
            store,
            task,
        }
    }

    fn frame(kind: &str, content: serde_json::Value) -> ControlFrame {
        ControlFrame {
            kind: kind.into(),
            content,
            next_node: None,
        }
    }

    #[tokio::test]
    async fn test_tasks_info_assigns_every_listed_subtask() {
        let fx = fixture().await;
        let t1 = format!("{}_0_1", fx.task.id);
        let t2 = format!("{}_0_2", fx.task.id);

        let result = fx
            .dispatcher
            .dispatch(&frame("tasks_info", json!({ "nodeA": [t1, t2] })))
            .await;
        assert!(matches!(result, CommandResult::Completed { .. }));

        let subs = fx.store.get_subtasks_by_parent(fx.task.id).await;
        for sub in &subs {
            assert_eq!(sub.assigned_drone.as_deref(), Some("nodeA"));
            assert_eq!(sub.status, TaskStatus::Running);
            assert!(sub.assigned_time.is_some());
        }
        let node = fx.store.get_drone_by_name("nodeA").await.unwrap();
        assert_eq!(node.assigned_subtasks.len(), 2);
    }

    #[tokio::test]
    async fn test_roster_merges_drones() {
        let fx = fixture().await;
        let before = fx.store.get_drone_by_name("nodeA").await.unwrap();

        let content = json!({
            "nodes_name": ["nodeA", "nodeC", "nodeD"],
            "x": [1.0, 2.0],
            "y": [3.0, 4.0, 5.0],
            "cpu_used_rate": [0.5, 0.25, 0.1],
            "memory": [512, 256, 128],
            "left_bandwidth": [100, 200, 300],
        });
        let result = fx.dispatcher.dispatch(&frame("ans_node_info", content)).await;
        assert!(matches!(result, CommandResult::Completed { .. }));

        let after = fx.store.get_drone_by_name("nodeA").await.unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.cpu_used_rate, 0.5);
        assert!(fx.store.get_drone_by_name("nodeC").await.is_some());
        // Shortest list wins
        assert!(fx.store.get_drone_by_name("nodeD").await.is_none());
    }

    #[tokio::test]
    async fn test_subtasks_info_creates_missing_only() {
        let fx = fixture().await;
        let group = format!("{}_0", fx.task.id);
        let existing = format!("{}_0_1", fx.task.id);
        let fresh = format!("{}_0_3", fx.task.id);

        let mut content = serde_json::Map::new();
        content.insert(group, json!([existing, fresh.clone()]));
        fx.dispatcher
            .dispatch(&frame("Subtasks_info", serde_json::Value::Object(content)))
            .await;

        let subs = fx.store.get_subtasks_by_parent(fx.task.id).await;
        assert_eq!(subs.len(), 3);
        let created = subs.iter().find(|s| s.description == fresh).unwrap();
        assert_eq!(created.status, TaskStatus::WaitingForActivation);
        assert_eq!(created.parent_task, fx.task.id);
    }

    #[tokio::test]
    async fn test_reassign_moves_subtask() {
        let fx = fixture().await;
        let t1 = format!("{}_0_1", fx.task.id);
        fx.dispatcher
            .dispatch(&frame("tasks_info", json!({ "nodeA": [t1.clone()] })))
            .await;

        let content = json!({
            "old_node_name": ["nodeA"],
            "subtask_name": [t1.clone()],
            "task_name": [fx.task.id.to_string()],
            "new_node_name": ["nodeB"],
        });
        let result = fx.dispatcher.dispatch(&frame("reassign_info", content)).await;
        assert!(matches!(result, CommandResult::Completed { .. }));

        let sub = swarmlink_shared::find_subtask_by_name(fx.store.as_ref(), None, &t1)
            .await
            .unwrap();
        assert_eq!(sub.assigned_drone.as_deref(), Some("nodeB"));
        assert_eq!(sub.reassignment_count, 1);

        let a = fx.store.get_drone_by_name("nodeA").await.unwrap();
        let b = fx.store.get_drone_by_name("nodeB").await.unwrap();
        assert!(a.assigned_subtasks.is_empty());
        assert_eq!(b.assigned_subtasks, vec![sub.id]);
    }

    #[tokio::test]
    async fn test_missing_entities_are_skipped() {
        let fx = fixture().await;
        let t1 = format!("{}_0_1", fx.task.id);

        let result = fx
            .dispatcher
            .dispatch(&frame("tasks_info", json!({ "nodeA": [t1, "bogus_1_1"] })))
            .await;
        assert_eq!(result, CommandResult::Partial { applied: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames_are_rejected() {
        let fx = fixture().await;

        let unknown = fx.dispatcher.dispatch(&frame("start_all", json!("30"))).await;
        assert!(matches!(unknown, CommandResult::Rejected { .. }));

        let malformed = fx.dispatcher.dispatch(&frame("tasks_info", json!("oops"))).await;
        assert!(matches!(malformed, CommandResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_cluster_info_changes_nothing() {
        let fx = fixture().await;
        let result = fx
            .dispatcher
            .dispatch(&frame("cluster_info", json!({ "c1": ["nodeA", "nodeB"] })))
            .await;
        assert!(matches!(result, CommandResult::Completed { .. }));
        assert_eq!(fx.store.drones().await.len(), 2);
    }
}

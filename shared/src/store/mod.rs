//! Collaborator interfaces for task and drone state
//!
//! The protocol layer never owns persistent state. It reads and mutates tasks
//! through [`TaskStore`] and drones through [`DroneRegistry`], and listens to
//! their change events over broadcast channels.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{parent_of_subtask, Drone, MainTask, SubTask};

/// Store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

/// Kind of change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Drone registry change notification
#[derive(Debug, Clone, PartialEq)]
pub struct DroneEvent {
    pub kind: ChangeKind,
    pub drone: Drone,
}

/// Main task change notification
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub kind: ChangeKind,
    pub task: MainTask,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_main_task(&self, task_id: Uuid) -> Option<MainTask>;

    /// Insert a main task and announce it
    async fn add_main_task(&self, task: MainTask) -> Result<(), StoreError>;

    async fn remove_main_task(&self, task_id: Uuid) -> Result<MainTask, StoreError>;

    async fn get_subtasks_by_parent(&self, task_id: Uuid) -> Vec<SubTask>;

    async fn get_subtask(&self, task_id: Uuid, subtask_id: Uuid) -> Option<SubTask>;

    /// Attach a subtask to its parent task
    async fn add_subtask(&self, subtask: SubTask) -> Result<(), StoreError>;

    async fn update_subtask(&self, subtask: SubTask) -> Result<(), StoreError>;

    async fn complete_subtask(&self, subtask_id: Uuid) -> Result<(), StoreError>;

    async fn complete_main_task(&self, task_id: Uuid) -> Result<(), StoreError>;

    /// Move a subtask to another drone, bumping its reassignment count
    async fn reassign_subtask(&self, subtask_id: Uuid, drone_name: &str) -> Result<(), StoreError>;

    /// Store image bytes under a subtask and return the new image id
    async fn save_subtask_image(
        &self,
        subtask_id: Uuid,
        data: Bytes,
        file_name: &str,
        image_index: i32,
        description: Option<String>,
    ) -> Result<Uuid, StoreError>;

    fn subscribe_tasks(&self) -> broadcast::Receiver<TaskEvent>;
}

#[async_trait]
pub trait DroneRegistry: Send + Sync {
    async fn get_drone_by_name(&self, name: &str) -> Option<Drone>;

    async fn drones(&self) -> Vec<Drone>;

    /// Merge a roster into the registry by drone name
    async fn set_drones(&self, drones: Vec<Drone>);

    async fn remove_drone(&self, name: &str) -> Result<Drone, StoreError>;

    async fn assign_subtask_to_drone(
        &self,
        drone_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn unassign_subtask_from_drone(
        &self,
        drone_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<(), StoreError>;

    fn subscribe_drones(&self) -> broadcast::Receiver<DroneEvent>;
}

/// Find a subtask by its coordinator-assigned name
///
/// `parent` overrides the id parsed out of the name when the caller already
/// knows it.
pub async fn find_subtask_by_name(
    store: &dyn TaskStore,
    parent: Option<Uuid>,
    name: &str,
) -> Result<SubTask, StoreError> {
    let parent = parent
        .or_else(|| parent_of_subtask(name))
        .ok_or_else(|| StoreError::InvalidId(name.to_string()))?;

    store
        .get_subtasks_by_parent(parent)
        .await
        .into_iter()
        .find(|s| s.description == name)
        .ok_or_else(|| StoreError::not_found("subtask", name))
}

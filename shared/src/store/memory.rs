//! In-memory implementation of both collaborator traits

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{ChangeKind, DroneEvent, DroneRegistry, StoreError, TaskEvent, TaskStore};
use crate::model::{
    content_type_for, file_extension, Drone, DroneStatus, MainTask, SubTask, SubTaskImage,
    TaskStatus,
};

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct TaskState {
    tasks: HashMap<Uuid, MainTask>,
    /// subtask id -> parent task id
    parents: HashMap<Uuid, Uuid>,
    /// image id -> bytes
    images: HashMap<Uuid, Bytes>,
}

impl TaskState {
    fn subtask_mut(&mut self, subtask_id: Uuid) -> Result<(&mut MainTask, usize), StoreError> {
        let parent = *self
            .parents
            .get(&subtask_id)
            .ok_or_else(|| StoreError::not_found("subtask", subtask_id))?;
        let task = self
            .tasks
            .get_mut(&parent)
            .ok_or_else(|| StoreError::not_found("task", parent))?;
        let idx = task
            .subtasks
            .iter()
            .position(|s| s.id == subtask_id)
            .ok_or_else(|| StoreError::not_found("subtask", subtask_id))?;
        Ok((task, idx))
    }
}

/// Task store and drone registry held in process memory
pub struct InMemoryStore {
    tasks: RwLock<TaskState>,
    /// Keyed by drone name
    drones: RwLock<HashMap<String, Drone>>,
    task_events: broadcast::Sender<TaskEvent>,
    drone_events: broadcast::Sender<DroneEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (task_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (drone_events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tasks: RwLock::new(TaskState::default()),
            drones: RwLock::new(HashMap::new()),
            task_events,
            drone_events,
        }
    }

    /// Raw bytes of a stored image
    pub async fn image(&self, image_id: Uuid) -> Option<Bytes> {
        self.tasks.read().await.images.get(&image_id).cloned()
    }

    fn emit_task(&self, kind: ChangeKind, task: MainTask) {
        // No subscribers is fine
        let _ = self.task_events.send(TaskEvent { kind, task });
    }

    fn emit_drone(&self, kind: ChangeKind, drone: Drone) {
        let _ = self.drone_events.send(DroneEvent { kind, drone });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn get_main_task(&self, task_id: Uuid) -> Option<MainTask> {
        self.tasks.read().await.tasks.get(&task_id).cloned()
    }

    async fn add_main_task(&self, task: MainTask) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::InvalidId(task.id.to_string()));
        }
        for sub in &task.subtasks {
            state.parents.insert(sub.id, task.id);
        }
        state.tasks.insert(task.id, task.clone());
        drop(state);

        self.emit_task(ChangeKind::Added, task);
        Ok(())
    }

    async fn remove_main_task(&self, task_id: Uuid) -> Result<MainTask, StoreError> {
        let mut state = self.tasks.write().await;
        let task = state
            .tasks
            .remove(&task_id)
            .ok_or_else(|| StoreError::not_found("task", task_id))?;
        for sub in &task.subtasks {
            state.parents.remove(&sub.id);
            for image in &sub.images {
                state.images.remove(&image.id);
            }
        }
        drop(state);

        self.emit_task(ChangeKind::Removed, task.clone());
        Ok(task)
    }

    async fn get_subtasks_by_parent(&self, task_id: Uuid) -> Vec<SubTask> {
        self.tasks
            .read()
            .await
            .tasks
            .get(&task_id)
            .map(|t| t.subtasks.clone())
            .unwrap_or_default()
    }

    async fn get_subtask(&self, task_id: Uuid, subtask_id: Uuid) -> Option<SubTask> {
        let state = self.tasks.read().await;
        state
            .tasks
            .get(&task_id)?
            .subtasks
            .iter()
            .find(|s| s.id == subtask_id)
            .cloned()
    }

    async fn add_subtask(&self, subtask: SubTask) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        let parent = subtask.parent_task;
        let task = state
            .tasks
            .get_mut(&parent)
            .ok_or_else(|| StoreError::not_found("task", parent))?;
        if task.subtasks.iter().any(|s| s.id == subtask.id) {
            return Err(StoreError::InvalidId(subtask.id.to_string()));
        }
        let id = subtask.id;
        task.subtasks.push(subtask);
        state.parents.insert(id, parent);
        Ok(())
    }

    async fn update_subtask(&self, subtask: SubTask) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        let (task, idx) = state.subtask_mut(subtask.id)?;
        task.subtasks[idx] = subtask;
        Ok(())
    }

    async fn complete_subtask(&self, subtask_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        let (task, idx) = state.subtask_mut(subtask_id)?;
        let sub = &mut task.subtasks[idx];
        sub.status = TaskStatus::RanToCompletion;
        sub.completed_time = Some(Utc::now());
        debug!(%subtask_id, "Subtask completed");
        Ok(())
    }

    async fn complete_main_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::not_found("task", task_id))?;
        task.status = TaskStatus::RanToCompletion;
        task.completed_time = Some(Utc::now());
        let snapshot = task.clone();
        drop(state);

        self.emit_task(ChangeKind::Updated, snapshot);
        Ok(())
    }

    async fn reassign_subtask(&self, subtask_id: Uuid, drone_name: &str) -> Result<(), StoreError> {
        let mut state = self.tasks.write().await;
        let (task, idx) = state.subtask_mut(subtask_id)?;
        let sub = &mut task.subtasks[idx];
        sub.assigned_drone = Some(drone_name.to_string());
        sub.reassignment_count += 1;
        sub.assigned_time = Some(Utc::now());
        sub.status = TaskStatus::Running;
        Ok(())
    }

    async fn save_subtask_image(
        &self,
        subtask_id: Uuid,
        data: Bytes,
        file_name: &str,
        image_index: i32,
        description: Option<String>,
    ) -> Result<Uuid, StoreError> {
        let image = SubTaskImage {
            id: Uuid::now_v7(),
            subtask_id,
            file_name: file_name.to_string(),
            file_extension: file_extension(file_name).to_string(),
            file_size: data.len() as u64,
            content_type: content_type_for(file_name).to_string(),
            image_index,
            upload_time: Utc::now(),
            description,
        };
        let image_id = image.id;

        let mut state = self.tasks.write().await;
        let (task, idx) = state.subtask_mut(subtask_id)?;
        let images = &mut task.subtasks[idx].images;
        images.push(image);
        images.sort_by_key(|i| i.image_index);
        state.images.insert(image_id, data);

        Ok(image_id)
    }

    fn subscribe_tasks(&self) -> broadcast::Receiver<TaskEvent> {
        self.task_events.subscribe()
    }
}

#[async_trait]
impl DroneRegistry for InMemoryStore {
    async fn get_drone_by_name(&self, name: &str) -> Option<Drone> {
        self.drones.read().await.get(name).cloned()
    }

    async fn drones(&self) -> Vec<Drone> {
        let mut all: Vec<Drone> = self.drones.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    async fn set_drones(&self, drones: Vec<Drone>) {
        let mut events = Vec::with_capacity(drones.len());
        {
            let mut registry = self.drones.write().await;
            for incoming in drones {
                match registry.get_mut(&incoming.name) {
                    Some(known) => {
                        known.position = incoming.position;
                        known.cpu_used_rate = incoming.cpu_used_rate;
                        known.memory = incoming.memory;
                        known.left_bandwidth = incoming.left_bandwidth;
                        known.radius = incoming.radius;
                        events.push((ChangeKind::Updated, known.clone()));
                    }
                    None => {
                        events.push((ChangeKind::Added, incoming.clone()));
                        registry.insert(incoming.name.clone(), incoming);
                    }
                }
            }
        }

        for (kind, drone) in events {
            self.emit_drone(kind, drone);
        }
    }

    async fn remove_drone(&self, name: &str) -> Result<Drone, StoreError> {
        let drone = self
            .drones
            .write()
            .await
            .remove(name)
            .ok_or_else(|| StoreError::not_found("drone", name))?;
        self.emit_drone(ChangeKind::Removed, drone.clone());
        Ok(drone)
    }

    async fn assign_subtask_to_drone(
        &self,
        drone_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut registry = self.drones.write().await;
        let drone = registry
            .values_mut()
            .find(|d| d.id == drone_id)
            .ok_or_else(|| StoreError::not_found("drone", drone_id))?;
        if !drone.assigned_subtasks.contains(&subtask_id) {
            drone.assigned_subtasks.push(subtask_id);
        }
        drone.status = DroneStatus::InMission;
        let snapshot = drone.clone();
        drop(registry);

        self.emit_drone(ChangeKind::Updated, snapshot);
        Ok(())
    }

    async fn unassign_subtask_from_drone(
        &self,
        drone_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut registry = self.drones.write().await;
        let drone = registry
            .values_mut()
            .find(|d| d.id == drone_id)
            .ok_or_else(|| StoreError::not_found("drone", drone_id))?;
        drone.assigned_subtasks.retain(|id| *id != subtask_id);
        if drone.assigned_subtasks.is_empty() && drone.status == DroneStatus::InMission {
            drone.status = DroneStatus::Idle;
        }
        let snapshot = drone.clone();
        drop(registry);

        self.emit_drone(ChangeKind::Updated, snapshot);
        Ok(())
    }

    fn subscribe_drones(&self) -> broadcast::Receiver<DroneEvent> {
        self.drone_events.subscribe()
    }
}

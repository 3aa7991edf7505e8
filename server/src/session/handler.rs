//! Applies worker reports to the task store

use bytes::Bytes;
use std::sync::Arc;
use swarmlink_shared::message::TaskReport;
use swarmlink_shared::model::parent_of_subtask;
use swarmlink_shared::{find_subtask_by_name, ImageTransferDescriptor, StoreError, TaskStore};
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a completion report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Subtask completed, siblings still pending
    Subtask,
    /// Subtask completed and it was the last one of its parent
    MainTask,
}

/// Bridges decoded worker frames to the task store
#[derive(Clone)]
pub struct ReportHandler {
    tasks: Arc<dyn TaskStore>,
}

impl ReportHandler {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    /// Save a fully received image under the subtask it names
    pub async fn store_image(
        &self,
        desc: &ImageTransferDescriptor,
        data: Bytes,
    ) -> Result<Uuid, StoreError> {
        let parent = Uuid::parse_str(&desc.task_id).ok();
        let subtask = find_subtask_by_name(self.tasks.as_ref(), parent, &desc.subtask_name).await?;
        let size = data.len();

        let image_id = self
            .tasks
            .save_subtask_image(
                subtask.id,
                data,
                &desc.file_name,
                desc.image_index,
                Some(format!("Result image for subtask {}", desc.subtask_name)),
            )
            .await?;

        info!(
            subtask = %desc.subtask_name,
            %image_id,
            file = %desc.file_name,
            index = desc.image_index,
            total = desc.total_images,
            size,
            "Stored image"
        );
        Ok(image_id)
    }

    /// Mark the reported subtask complete, then its parent if every sibling is
    pub async fn complete(&self, report: &TaskReport) -> Result<Completion, StoreError> {
        let parent = Uuid::parse_str(&report.task_id)
            .ok()
            .or_else(|| parent_of_subtask(&report.subtask_name))
            .ok_or_else(|| StoreError::InvalidId(report.task_id.clone()))?;

        let subtask =
            find_subtask_by_name(self.tasks.as_ref(), Some(parent), &report.subtask_name).await?;
        self.tasks.complete_subtask(subtask.id).await?;
        debug!(
            subtask = %report.subtask_name,
            result = ?report.result,
            "Subtask reported complete"
        );

        let siblings = self.tasks.get_subtasks_by_parent(parent).await;
        if siblings.iter().all(|s| s.is_complete()) {
            self.tasks.complete_main_task(parent).await?;
            info!(task = %parent, "All subtasks complete, main task finished");
            return Ok(Completion::MainTask);
        }

        Ok(Completion::Subtask)
    }
}

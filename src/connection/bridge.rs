//! Forwards store change events to the coordinator

use swarmlink_shared::{ChangeKind, ControlFrame, DroneEvent, TaskEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::manager::CoordinatorClient;
use crate::transport::TransportConnector;

/// A removed drone is told to shut down
pub fn drone_event_frame(event: &DroneEvent) -> Option<ControlFrame> {
    match event.kind {
        ChangeKind::Removed => Some(ControlFrame::command("shutdown", event.drone.name.clone())),
        ChangeKind::Added | ChangeKind::Updated => None,
    }
}

/// A new main task is handed to the coordinator for planning
pub fn task_event_frame(event: &TaskEvent) -> Option<ControlFrame> {
    match event.kind {
        ChangeKind::Added => Some(
            ControlFrame::command("create_tasks", event.task.description.clone())
                .with_next_node(event.task.id.to_string()),
        ),
        ChangeKind::Updated | ChangeKind::Removed => None,
    }
}

/// Relay events until the store drops its senders
pub async fn run_event_bridge<C: TransportConnector>(
    client: CoordinatorClient<C>,
    mut drones: broadcast::Receiver<DroneEvent>,
    mut tasks: broadcast::Receiver<TaskEvent>,
) {
    loop {
        let frame = tokio::select! {
            event = drones.recv() => match event {
                Ok(event) => drone_event_frame(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Drone events lagged");
                    None
                }
                Err(RecvError::Closed) => break,
            },
            event = tasks.recv() => match event {
                Ok(event) => task_event_frame(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Task events lagged");
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        if let Some(frame) = frame {
            debug!(kind = %frame.kind, "Forwarding store event");
            // Queue-full is already logged by the client
            let _ = client.send(&frame);
        }
    }
    debug!("Event bridge stopped");
}

//! Task and drone model populated by the protocol layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Drone operating status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DroneStatus {
    #[default]
    Idle,
    InMission,
    Returning,
    Maintenance,
    Offline,
    Emergency,
}

/// Planar position reported by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Default coverage radius when the roster does not report one
pub const DEFAULT_RADIUS: f64 = 500.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub id: Uuid,
    pub name: String,
    pub status: DroneStatus,
    pub position: Option<Position>,
    pub cpu_used_rate: f64,
    pub memory: f64,
    pub left_bandwidth: f64,
    pub radius: f64,
    pub assigned_subtasks: Vec<Uuid>,
}

impl Drone {
    /// Create an idle drone with a fresh identity
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            status: DroneStatus::Idle,
            position: None,
            cpu_used_rate: 0.0,
            memory: 0.0,
            left_bandwidth: 1000.0,
            radius: DEFAULT_RADIUS,
            assigned_subtasks: Vec::new(),
        }
    }
}

/// Lifecycle of main tasks and subtasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Created,
    WaitingForActivation,
    Running,
    RanToCompletion,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskImage {
    pub id: Uuid,
    pub subtask_id: Uuid,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
    pub content_type: String,
    pub image_index: i32,
    pub upload_time: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: Uuid,
    /// Name assigned by the coordinator: `<mainTaskId>_<group>_<index>`
    pub description: String,
    pub status: TaskStatus,
    pub creation_time: DateTime<Utc>,
    pub assigned_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub parent_task: Uuid,
    pub reassignment_count: u32,
    pub assigned_drone: Option<String>,
    /// Image metadata only; bytes live in the store
    pub images: Vec<SubTaskImage>,
}

impl SubTask {
    pub fn new(parent_task: Uuid, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            description: description.into(),
            status: TaskStatus::WaitingForActivation,
            creation_time: Utc::now(),
            assigned_time: None,
            completed_time: None,
            parent_task,
            reassignment_count: 0,
            assigned_drone: None,
            images: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::RanToCompletion
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainTask {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub creation_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub subtasks: Vec<SubTask>,
}

impl MainTask {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Created,
            creation_time: Utc::now(),
            start_time: None,
            completed_time: None,
            subtasks: Vec::new(),
        }
    }
}

/// Parent task id of a subtask name (`<id>_<group>_<index>`)
pub fn parent_of_subtask(name: &str) -> Option<Uuid> {
    strip_segments(name, 2)
}

/// Parent task id of a group key (`<id>_<group>`)
pub fn parent_of_group(key: &str) -> Option<Uuid> {
    strip_segments(key, 1)
}

fn strip_segments(name: &str, count: usize) -> Option<Uuid> {
    let mut head = name;
    for _ in 0..count {
        head = &head[..head.rfind('_')?];
    }
    Uuid::parse_str(head).ok()
}

/// MIME type for a stored image, by file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_extension(file_name).to_ascii_lowercase();
    match ext.as_str() {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".webp" => "image/webp",
        ".svg" => "image/svg+xml",
        _ => "image/png",
    }
}

/// Extension including the leading dot, or empty
pub fn file_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[pos..],
        _ => "",
    }
}

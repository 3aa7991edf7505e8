//! Wire messages for both channels
//!
//! The two channels share a JSON envelope shape (`type`, `content`,
//! optional `next_node`) but differ in what follows it on the wire:
//!
//! - [`TransferFrame`] is sent by workers to the ingestion server. Its header
//!   is newline-terminated and image-bearing types are followed by exactly
//!   `content.filesize` raw bytes.
//! - [`ControlFrame`] is exchanged with the coordinator. It is length-prefixed
//!   JSON only and never carries a binary attachment.
//!
//! Each frame is decoded once into a typed message ([`TransferMessage`],
//! [`CoordinatorMessage`]) so handlers never look fields up by hand.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while turning a frame into a typed message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Missing field '{field}' in {kind} frame")]
    MissingField { kind: String, field: &'static str },

    #[error("Invalid value for '{field}' in {kind} frame: {value}")]
    InvalidField {
        kind: String,
        field: &'static str,
        value: String,
    },

    #[error("Content of {0} frame is not an object")]
    ContentNotObject(String),
}

/// Command-channel frame (coordinator <-> gateway)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub next_node: Option<String>,
}

impl ControlFrame {
    /// Build an outgoing command whose content is a plain string
    pub fn command(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: Value::String(content.into()),
            next_node: None,
        }
    }

    /// Set the routing hint
    pub fn with_next_node(mut self, next_node: impl Into<String>) -> Self {
        self.next_node = Some(next_node.into());
        self
    }
}

/// Ingestion frame header (worker -> server)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub next_node: Option<String>,
}

impl TransferFrame {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: Map::new(),
            next_node: None,
        }
    }

    /// Add a content field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(name.into(), value.into());
        self
    }
}

/// Describes one image streamed after a `single_image`/`image_data` header
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransferDescriptor {
    pub task_id: String,
    pub subtask_name: String,
    pub image_index: i32,
    pub total_images: i32,
    pub file_name: String,
    /// Raw declared byte count; bounds are checked before any allocation
    pub declared_size: i64,
}

/// Completion report for a subtask (`task_info` / `task_result`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskReport {
    pub task_id: String,
    pub subtask_name: String,
    pub result: Option<String>,
}

/// Typed view of a [`TransferFrame`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransferMessage {
    /// One image follows the header
    SingleImage(ImageTransferDescriptor),
    /// Legacy batch header; carries an image only when it declares a size
    ImageData {
        task_id: String,
        subtask_name: String,
        image_count: i64,
        transfer: Option<ImageTransferDescriptor>,
    },
    TaskInfo(TaskReport),
    TaskResult(TaskReport),
    Unknown(String),
}

impl TryFrom<TransferFrame> for TransferMessage {
    type Error = ProtocolError;

    fn try_from(frame: TransferFrame) -> Result<Self, Self::Error> {
        let content = &frame.content;
        match frame.kind.as_str() {
            "single_image" => {
                let declared_size = int_field(&frame.kind, content, "filesize")?
                    .ok_or_else(|| missing(&frame.kind, "filesize"))?;
                Ok(Self::SingleImage(descriptor(content, declared_size)?))
            }
            "image_data" => {
                let image_count = int_field(&frame.kind, content, "image_count")?.unwrap_or(0);
                let transfer = match int_field(&frame.kind, content, "filesize")? {
                    Some(size) if size > 0 => Some(descriptor(content, size)?),
                    _ => None,
                };
                Ok(Self::ImageData {
                    task_id: str_field(content, "task_id").unwrap_or_default(),
                    subtask_name: str_field(content, "subtask_name").unwrap_or_default(),
                    image_count,
                    transfer,
                })
            }
            "task_info" => Ok(Self::TaskInfo(report(content))),
            "task_result" => Ok(Self::TaskResult(report(content))),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

fn descriptor(
    content: &Map<String, Value>,
    declared_size: i64,
) -> Result<ImageTransferDescriptor, ProtocolError> {
    let kind = "image";
    Ok(ImageTransferDescriptor {
        task_id: str_field(content, "task_id").unwrap_or_default(),
        subtask_name: str_field(content, "subtask_name").unwrap_or_default(),
        image_index: int_field(kind, content, "image_index")?.unwrap_or(1) as i32,
        total_images: int_field(kind, content, "total_images")?.unwrap_or(1) as i32,
        file_name: str_field(content, "filename").unwrap_or_default(),
        declared_size,
    })
}

fn report(content: &Map<String, Value>) -> TaskReport {
    TaskReport {
        task_id: str_field(content, "task_id").unwrap_or_default(),
        subtask_name: str_field(content, "subtask_name").unwrap_or_default(),
        result: str_field(content, "result"),
    }
}

fn missing(kind: &str, field: &'static str) -> ProtocolError {
    ProtocolError::MissingField {
        kind: kind.to_string(),
        field,
    }
}

/// Render a scalar as text; strings are taken verbatim
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

fn str_field(content: &Map<String, Value>, field: &str) -> Option<String> {
    content.get(field).and_then(scalar_text)
}

/// Integer field that may arrive as a number or numeric string
fn int_field(
    kind: &str,
    content: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, ProtocolError> {
    let Some(value) = content.get(field) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Null => return Ok(None),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| ProtocolError::InvalidField {
        kind: kind.to_string(),
        field,
        value: value.to_string(),
    })
}

/// Telemetry for one node in a roster update
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub cpu_used_rate: f64,
    pub memory: f64,
    pub left_bandwidth: f64,
    pub radius: Option<f64>,
}

/// One aligned tuple from a `reassign_info` frame
#[derive(Debug, Clone, PartialEq)]
pub struct Reassignment {
    pub old_node: String,
    pub subtask_name: String,
    pub task_id: String,
    pub new_node: String,
}

/// Typed view of a [`ControlFrame`] received from the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorMessage {
    /// `ans_node_info`, `node_info`, `start_success`
    NodeRoster(Vec<NodeReport>),
    /// `tasks_info`: node name -> subtask names
    TaskAssignment(Vec<(String, Vec<String>)>),
    /// `Subtasks_info`: group key -> subtask names
    SubtaskCreation(Vec<(String, Vec<String>)>),
    /// `reassign_info`
    Reassignment(Vec<Reassignment>),
    /// `cluster_info`: cluster key -> members
    ClusterInfo(Vec<(String, Vec<String>)>),
    Unknown(String),
}

impl TryFrom<&ControlFrame> for CoordinatorMessage {
    type Error = ProtocolError;

    fn try_from(frame: &ControlFrame) -> Result<Self, Self::Error> {
        let kind = frame.kind.as_str();
        let known = matches!(
            kind,
            "ans_node_info"
                | "node_info"
                | "start_success"
                | "tasks_info"
                | "Subtasks_info"
                | "reassign_info"
                | "cluster_info"
        );
        if !known {
            return Ok(Self::Unknown(kind.to_string()));
        }

        let content = frame
            .content
            .as_object()
            .ok_or_else(|| ProtocolError::ContentNotObject(kind.to_string()))?;

        match kind {
            "ans_node_info" | "node_info" | "start_success" => {
                Ok(Self::NodeRoster(roster(kind, content)?))
            }
            "tasks_info" => Ok(Self::TaskAssignment(keyed_lists(content))),
            "Subtasks_info" => Ok(Self::SubtaskCreation(keyed_lists(content))),
            "cluster_info" => Ok(Self::ClusterInfo(keyed_lists(content))),
            _ => Ok(Self::Reassignment(reassignments(kind, content)?)),
        }
    }
}

/// View a content entry as a list; a bare scalar counts as a one-element list
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn keyed_lists(content: &Map<String, Value>) -> Vec<(String, Vec<String>)> {
    content
        .iter()
        .map(|(key, value)| {
            let items = as_list(value).into_iter().filter_map(scalar_text).collect();
            (key.clone(), items)
        })
        .collect()
}

fn text_list(
    kind: &str,
    content: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, ProtocolError> {
    let value = content.get(field).ok_or_else(|| missing(kind, field))?;
    Ok(as_list(value)
        .into_iter()
        .map(|v| scalar_text(v).unwrap_or_default())
        .collect())
}

fn number_list(
    kind: &str,
    content: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<f64>, ProtocolError> {
    let value = content.get(field).ok_or_else(|| missing(kind, field))?;
    as_list(value)
        .into_iter()
        .map(|v| {
            let parsed = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed.ok_or_else(|| ProtocolError::InvalidField {
                kind: kind.to_string(),
                field,
                value: v.to_string(),
            })
        })
        .collect()
}

fn roster(kind: &str, content: &Map<String, Value>) -> Result<Vec<NodeReport>, ProtocolError> {
    let names = text_list(kind, content, "nodes_name")?;
    let x = number_list(kind, content, "x")?;
    let y = number_list(kind, content, "y")?;
    let cpu = number_list(kind, content, "cpu_used_rate")?;
    let memory = number_list(kind, content, "memory")?;
    let bandwidth = number_list(kind, content, "left_bandwidth")?;
    let radius = match content.get("radius") {
        Some(_) => Some(number_list(kind, content, "radius")?),
        None => None,
    };

    // Parallel arrays: truncate to the shortest required list
    let count = [
        names.len(),
        x.len(),
        y.len(),
        cpu.len(),
        memory.len(),
        bandwidth.len(),
    ]
    .into_iter()
    .min()
    .unwrap_or(0);

    Ok((0..count)
        .map(|i| NodeReport {
            name: names[i].clone(),
            x: x[i],
            y: y[i],
            cpu_used_rate: cpu[i],
            memory: memory[i],
            left_bandwidth: bandwidth[i],
            radius: radius.as_ref().and_then(|r| r.get(i).copied()),
        })
        .collect())
}

fn reassignments(
    kind: &str,
    content: &Map<String, Value>,
) -> Result<Vec<Reassignment>, ProtocolError> {
    let old_nodes = text_list(kind, content, "old_node_name")?;
    let subtasks = text_list(kind, content, "subtask_name")?;
    let tasks = text_list(kind, content, "task_name")?;
    let new_nodes = text_list(kind, content, "new_node_name")?;

    let count = old_nodes
        .len()
        .min(subtasks.len())
        .min(tasks.len())
        .min(new_nodes.len());

    Ok((0..count)
        .map(|i| Reassignment {
            old_node: old_nodes[i].clone(),
            subtask_name: subtasks[i].clone(),
            task_id: tasks[i].clone(),
            new_node: new_nodes[i].clone(),
        })
        .collect())
}

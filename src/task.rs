// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared data model: task payloads, task/node status enums, and node
//! records. These are the types that cross the Registry and Store
//! boundaries; everything inside the engine operates on them directly
//! rather than on raw JSON or SQL rows.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Source type of a packed translation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    Text,
    Audio,
}

impl SourceType {
    /// Wire code used by the packed format (§4.1): 0 = TEXT, 1 = AUDIO.
    pub const fn code(self) -> u16 {
        match self {
            SourceType::Text => 0,
            SourceType::Audio => 1,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(SourceType::Text),
            1 => Some(SourceType::Audio),
            _ => None,
        }
    }

    /// Parses the case-insensitive query-side spelling ("TEXT"/"AUDIO").
    /// Unlike `FromStr`, an unknown spelling is not an error: callers treat
    /// it as a deliberate negative lookup, matching the codec's "unknown
    /// source type returns not-found without raising" contract.
    pub fn parse_query(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(SourceType::Text),
            "AUDIO" => Some(SourceType::Audio),
            _ => None,
        }
    }
}

/// Task lifecycle status. Progresses monotonically from `Pending` through
/// `Processing` to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node lifecycle status. Transitions are one-way: `Online -> ShuttingDown
/// -> Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Online,
    ShuttingDown,
    Offline,
}

impl NodeStatus {
    pub const fn accepts_tasks(self) -> bool {
        matches!(self, NodeStatus::Online)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "ONLINE",
            NodeStatus::ShuttingDown => "SHUTTING_DOWN",
            NodeStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task payload as it arrives on `task_queue:{nodeId}` (§6). Deserialized
/// directly from the queue's JSON element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "sourceLanguage")]
    pub source_language: String,
    #[serde(rename = "targetLanguages")]
    pub target_languages: Vec<String>,
    #[serde(rename = "textContent", default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(rename = "audioFilePath", default, skip_serializing_if = "Option::is_none")]
    pub audio_file_path: Option<String>,
    #[serde(rename = "originalText", default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

/// A control-channel message read from `control_queue:{nodeId}` (§6). Only
/// `CANCEL_TASK` is a defined action; anything else deserializes into
/// `Unknown` and is logged and dropped per §9's re-architecture mapping.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    CancelTask { task_id: String },
    Unknown { action: String },
}

impl<'de> Deserialize<'de> for ControlMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: serde::Deserializer<'de> {
        #[derive(Deserialize)]
        struct Raw {
            action: String,
            #[serde(rename = "taskId", default)]
            task_id: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(match raw.action.as_str() {
            "CANCEL_TASK" => ControlMessage::CancelTask {
                task_id: raw.task_id.unwrap_or_default(),
            },
            other => ControlMessage::Unknown {
                action: other.to_string(),
            },
        })
    }
}

/// Resource sample taken by the Resource Probe and folded into the node
/// record on every heartbeat.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_percent: f64,
    pub cpu_usage: f64,
    pub gpu_available: bool,
    pub gpu_memory_total: u64,
    pub gpu_memory_used: u64,
    pub gpu_memory_percent: f64,
}

/// The node record published at `worker_nodes:{nodeId}` (§3, §6).
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub max_concurrent_tasks: u32,
    pub active_task_count: u32,
    pub resources: ResourceSample,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

impl NodeRecord {
    /// Node score in `[0, 1]`; lower is better. §4.2.
    pub fn score(&self) -> f64 {
        let mem = self.resources.memory_percent / 100.0;
        let cpu = self.resources.cpu_usage / 100.0;
        let load = (f64::from(self.active_task_count) / 10.0).min(1.0);
        0.4 * mem + 0.3 * cpu + 0.3 * load
    }
}

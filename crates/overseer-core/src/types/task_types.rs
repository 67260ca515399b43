//! Command queue and task tracking types

use serde::{Deserialize, Serialize};

/// Where a command came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    #[default]
    Text,
    Voice,
}

impl CommandSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

/// Options accepted by `AgentSupervisor::enqueue_command`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOptions {
    #[serde(default)]
    pub hidden: bool,
}

/// Settled result of a one-shot command turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    pub text: String,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok(text: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            session_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            session_id: None,
            error: Some(error.into()),
        }
    }
}

/// Task status state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Kind of progress reported by a runtime while a task runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStepKind {
    Thinking,
    ToolUse,
    Output,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub kind: TaskStepKind,
    pub summary: String,
}

impl TaskStep {
    pub fn new(kind: TaskStepKind, summary: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            kind,
            summary: summary.into(),
        }
    }
}

/// The current (or last) task for an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub command: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub steps: Vec<TaskStep>,
    pub status: TaskStatus,
}

impl TaskInfo {
    pub fn start(command: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            started_at: chrono::Utc::now(),
            steps: Vec::new(),
            status: TaskStatus::Running,
        }
    }

    /// Move to a terminal status; a task that already failed stays failed
    pub fn finish(&mut self, status: TaskStatus) {
        if self.status == TaskStatus::Running {
            self.status = status;
        }
    }
}

//! Agent profile and runtime state types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Agent profile as persisted by the profile store
///
/// The supervisor treats profiles as read-only; changes go through
/// `AgentSupervisor::update`, which swaps the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub runtime: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Env var name -> secret name
    #[serde(default)]
    pub secret_bindings: HashMap<String, String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub allow_full_access: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub is_system: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl AgentProfile {
    /// Build a profile from creation input with a fresh identity
    pub fn from_input(input: NewAgentProfile) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            runtime: input.runtime,
            cwd: input.cwd,
            env: input.env,
            secret_bindings: input.secret_bindings,
            color: input.color,
            voice: input.voice,
            model: input.model,
            extra_args: input.extra_args,
            allow_full_access: input.allow_full_access,
            auto_start: input.auto_start,
            is_system: input.is_system,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for `AgentSupervisor::create`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgentProfile {
    pub name: String,
    pub runtime: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub secret_bindings: HashMap<String, String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub allow_full_access: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub is_system: bool,
}

impl NewAgentProfile {
    pub fn new(
        name: impl Into<String>,
        runtime: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            cwd: cwd.into(),
            ..Default::default()
        }
    }
}

/// Agent process lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Restarting,
    Error,
}

/// UI activity indicator, independent from the lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    #[default]
    Offline,
    Idle,
    Listening,
    Thinking,
    Speaking,
    Working,
    Error,
}

/// Agent runtime state (in-memory only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub profile: Arc<AgentProfile>,
    pub status: AgentStatus,
    pub visual_state: VisualState,
    pub pid: Option<u32>,
    pub error_message: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

impl AgentState {
    pub fn new(profile: Arc<AgentProfile>) -> Self {
        Self {
            profile,
            status: AgentStatus::Stopped,
            visual_state: VisualState::Offline,
            pid: None,
            error_message: None,
            started_at: None,
            last_activity: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }
}

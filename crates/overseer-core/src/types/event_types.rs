//! Domain events published on the event bus

use super::{AgentStatus, CommandOutcome, TaskStep, VisualState};
use serde::{Deserialize, Serialize};

/// Everything the core reports to the outside world
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    StatusChanged {
        agent_id: String,
        status: AgentStatus,
        previous: AgentStatus,
    },
    VisualStateChanged {
        agent_id: String,
        state: VisualState,
    },
    CommandAck {
        agent_id: String,
        phrase: String,
    },
    QueueUpdate {
        agent_id: String,
        remaining: usize,
    },
    TaskStep {
        agent_id: String,
        task_id: String,
        step: TaskStep,
    },
    CommandOutput {
        agent_id: String,
        chunk: String,
    },
    CommandResult {
        agent_id: String,
        outcome: CommandOutcome,
        hidden: bool,
    },
    PtyOutput {
        agent_id: String,
        data: String,
    },
    SpawnFailed {
        agent_id: String,
        message: String,
        tail: String,
    },
    AgentCrashed {
        agent_id: String,
        exit_code: Option<u32>,
        tail: Vec<String>,
    },
    /// The agent and its profile are gone; per-agent state elsewhere can go too
    AgentDeleted {
        agent_id: String,
    },
    ServicesUpdated {
        agent_id: String,
        count: usize,
    },
    ServiceHealthChanged {
        agent_id: String,
        name: String,
        port: u16,
        alive: bool,
    },
}

impl FleetEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::StatusChanged { agent_id, .. }
            | Self::VisualStateChanged { agent_id, .. }
            | Self::CommandAck { agent_id, .. }
            | Self::QueueUpdate { agent_id, .. }
            | Self::TaskStep { agent_id, .. }
            | Self::CommandOutput { agent_id, .. }
            | Self::CommandResult { agent_id, .. }
            | Self::PtyOutput { agent_id, .. }
            | Self::SpawnFailed { agent_id, .. }
            | Self::AgentCrashed { agent_id, .. }
            | Self::AgentDeleted { agent_id, .. }
            | Self::ServicesUpdated { agent_id, .. }
            | Self::ServiceHealthChanged { agent_id, .. } => agent_id,
        }
    }
}

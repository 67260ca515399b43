//! Per-agent runtime aggregate
//!
//! Everything the supervisor tracks for one agent lives here, behind one
//! entry in the supervisor's registry.

use crate::types::{AgentState, CommandOutcome, CommandSource, TaskInfo};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub(crate) struct QueuedCommand {
    pub text: String,
    pub source: CommandSource,
    pub hidden: bool,
    pub reply: oneshot::Sender<CommandOutcome>,
}

/// FIFO plus the flag saying a worker is draining it
#[derive(Default)]
pub(crate) struct CommandQueue {
    pub entries: VecDeque<QueuedCommand>,
    pub processing: bool,
}

/// Cancellation handle for the queue-owned execution
pub(crate) struct ActiveExecution {
    pub generation: u64,
    pub cancel: CancellationToken,
}

pub(crate) struct AgentSlot {
    pub state: Mutex<AgentState>,
    pub queue: Mutex<CommandQueue>,
    pub task: Mutex<Option<TaskInfo>>,
    pub active: Mutex<Option<ActiveExecution>>,
    /// Out-of-band executions keyed by their detached key
    pub detached: Mutex<HashMap<String, CancellationToken>>,
    /// CLI session to resume on the next turn
    pub session_id: Mutex<Option<String>>,
    generation: AtomicU64,
}

impl AgentSlot {
    pub fn new(state: AgentState) -> Self {
        Self {
            state: Mutex::new(state),
            queue: Mutex::new(CommandQueue::default()),
            task: Mutex::new(None),
            active: Mutex::new(None),
            detached: Mutex::new(HashMap::new()),
            session_id: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Register a fresh token for the queue-owned execution
    pub fn arm(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *self.active.lock() = Some(ActiveExecution {
            generation,
            cancel: cancel.clone(),
        });
        (generation, cancel)
    }

    /// Release the token unless an abort (or a newer execution) replaced it
    pub fn disarm(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            *active = None;
        }
    }

    /// Cancel every execution this agent owns; returns how many were live
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        if let Some(active) = self.active.lock().take() {
            active.cancel.cancel();
            cancelled += 1;
        }
        for (_, token) in self.detached.lock().drain() {
            token.cancel();
            cancelled += 1;
        }
        cancelled
    }
}

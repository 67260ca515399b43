//! Owns every agent's PTY session and scrollback

use super::batcher::FlushSink;
use super::scrollback::Scrollback;
use super::session::{ExitCallback, PtySession, PtySpawnRequest};
use crate::config::SupervisorConfig;
use crate::error::{AgentError, Error, Result, SpawnError};
use crate::events::EventBus;
use crate::types::FleetEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// PTY multiplexer: one session per agent id
///
/// Scrollback outlives the session so history and crash diagnostics stay
/// available after the process is gone.
pub struct PtyManager {
    config: SupervisorConfig,
    bus: EventBus,
    sessions: Mutex<HashMap<String, Arc<PtySession>>>,
    scrollbacks: Mutex<HashMap<String, Arc<Mutex<Scrollback>>>>,
}

impl PtyManager {
    pub fn new(config: SupervisorConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            sessions: Mutex::new(HashMap::new()),
            scrollbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a process for `request.agent_id`, replacing any previous session
    pub fn spawn(&self, request: PtySpawnRequest, on_exit: ExitCallback) -> Result<Option<u32>> {
        let agent_id = request.agent_id.clone();
        if let Some(previous) = self.sessions.lock().remove(&agent_id) {
            previous.kill();
        }

        let scrollback = self.scrollback_for(&agent_id);
        let sink: FlushSink = {
            let bus = self.bus.clone();
            let agent_id = agent_id.clone();
            Arc::new(move |data| {
                bus.emit(FleetEvent::PtyOutput {
                    agent_id: agent_id.clone(),
                    data,
                })
            })
        };

        match PtySession::spawn(
            request,
            Arc::clone(&scrollback),
            self.config.flush_interval(),
            sink,
            on_exit,
        ) {
            Ok(session) => {
                let pid = session.pid();
                self.sessions.lock().insert(agent_id, session);
                Ok(pid)
            }
            Err(e) => {
                let tail = scrollback.lock().tail_text(self.config.spawn_error_tail_chars);
                warn!(agent_id = %agent_id, "PTY spawn failed: {}", e);
                Err(Error::Spawn(SpawnError {
                    agent_id,
                    message: e.to_string(),
                    tail,
                }))
            }
        }
    }

    /// Write raw bytes to the agent's stdin
    pub fn write(&self, agent_id: &str, data: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::Agent(AgentError::NotRunning(agent_id.to_string())))?;
        session.write(data.as_bytes())
    }

    pub fn resize(&self, agent_id: &str, cols: u16, rows: u16) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::Agent(AgentError::NotRunning(agent_id.to_string())))?;
        session.resize(cols, rows)
    }

    /// Kill the agent's process; returns whether a session existed
    pub fn kill(&self, agent_id: &str) -> bool {
        match self.sessions.lock().remove(agent_id) {
            Some(session) => {
                session.kill();
                true
            }
            None => false,
        }
    }

    pub fn kill_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            info!("Killing {} PTY session(s)", sessions.len());
        }
        for session in sessions {
            session.kill();
        }
    }

    pub fn is_alive(&self, agent_id: &str) -> bool {
        self.sessions
            .lock()
            .get(agent_id)
            .map(|s| s.is_alive())
            .unwrap_or(false)
    }

    pub fn pid(&self, agent_id: &str) -> Option<u32> {
        self.sessions.lock().get(agent_id).and_then(|s| s.pid())
    }

    /// Full retained history for replay
    pub fn scrollback(&self, agent_id: &str) -> Vec<String> {
        self.scrollbacks
            .lock()
            .get(agent_id)
            .map(|sb| sb.lock().lines())
            .unwrap_or_default()
    }

    pub fn tail(&self, agent_id: &str, lines: usize) -> Vec<String> {
        self.scrollbacks
            .lock()
            .get(agent_id)
            .map(|sb| sb.lock().tail(lines))
            .unwrap_or_default()
    }

    /// Drop everything held for a deleted agent
    pub fn remove(&self, agent_id: &str) {
        self.kill(agent_id);
        self.scrollbacks.lock().remove(agent_id);
    }

    fn scrollback_for(&self, agent_id: &str) -> Arc<Mutex<Scrollback>> {
        let max = self.config.scrollback_max;
        Arc::clone(
            self.scrollbacks
                .lock()
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Scrollback::new(max)))),
        )
    }
}

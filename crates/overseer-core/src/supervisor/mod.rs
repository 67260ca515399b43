//! Agent process supervisor
//!
//! Owns agent lifecycle state, hands interactive sessions to the PTY layer
//! and runs turn-based commands through each agent's runtime adapter.
//!
//! Commands for one agent run strictly one at a time, in submission order;
//! different agents run fully in parallel. See `queue.rs`.

mod queue;
mod slot;

pub use queue::{DetachedCommand, EnqueuedCommand};

use crate::collaborators::{
    ContextBuilder, ConversationStore, EnvSecretResolver, PassthroughContext, ProfileStore,
    SecretResolver, SecretValuesProvider,
};
use crate::config::SupervisorConfig;
use crate::error::{AgentError, Error, Result};
use crate::events::EventBus;
use crate::pty::{ExitCallback, PtyExit, PtyManager, PtySpawnRequest};
use crate::redact::SecretRedactor;
use crate::runtime::{RuntimeAdapter, RuntimeRegistry};
use crate::storage::Storage;
use crate::timer::PeriodicTask;
use crate::types::*;
use parking_lot::{Mutex, RwLock};
use slot::AgentSlot;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Collaborators the supervisor consumes
#[derive(Clone)]
pub struct SupervisorDeps {
    pub profiles: Arc<dyn ProfileStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub secrets: Arc<dyn SecretResolver>,
    pub secret_values: Arc<dyn SecretValuesProvider>,
    pub context: Arc<dyn ContextBuilder>,
}

impl SupervisorDeps {
    /// Stores plus host-environment secrets and no context enrichment
    ///
    /// The redactor learns the value of every secret the stored profiles bind.
    pub fn new(profiles: Arc<dyn ProfileStore>, conversations: Arc<dyn ConversationStore>) -> Self {
        Self {
            secrets: Arc::new(EnvSecretResolver::new()),
            secret_values: Arc::new(EnvSecretResolver::with_profiles(profiles.clone())),
            profiles,
            conversations,
            context: Arc::new(PassthroughContext),
        }
    }

    /// SQLite storage for both profiles and conversation history
    pub fn with_storage(storage: Storage) -> Self {
        let storage = Arc::new(storage);
        Self::new(storage.clone(), storage)
    }

    pub fn with_secrets(
        mut self,
        resolver: Arc<dyn SecretResolver>,
        values: Arc<dyn SecretValuesProvider>,
    ) -> Self {
        self.secrets = resolver;
        self.secret_values = values;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextBuilder>) -> Self {
        self.context = context;
        self
    }
}

/// Cheap to clone; all clones share one registry
#[derive(Clone)]
pub struct AgentSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: SupervisorConfig,
    bus: EventBus,
    runtimes: RuntimeRegistry,
    pty: PtyManager,
    deps: SupervisorDeps,
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    redactor: RwLock<Arc<SecretRedactor>>,
    /// Last conversation timestamp handed out (ms)
    last_timestamp: Mutex<i64>,
}

impl AgentSupervisor {
    pub fn new(
        config: SupervisorConfig,
        bus: EventBus,
        runtimes: RuntimeRegistry,
        deps: SupervisorDeps,
    ) -> Self {
        let pty = PtyManager::new(config.clone(), bus.clone());
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                bus,
                runtimes,
                pty,
                deps,
                agents: RwLock::new(HashMap::new()),
                redactor: RwLock::new(Arc::new(SecretRedactor::default())),
                last_timestamp: Mutex::new(0),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn runtimes(&self) -> &RuntimeRegistry {
        &self.inner.runtimes
    }

    /// Register every persisted profile; returns how many were loaded
    pub async fn load_profiles(&self) -> Result<usize> {
        let profiles = self.inner.deps.profiles.get_profiles().await?;
        let count = profiles.len();
        {
            let mut agents = self.inner.agents.write();
            for profile in profiles {
                if !self.inner.runtimes.contains(&profile.runtime) {
                    warn!(agent_id = %profile.id, runtime = %profile.runtime, "Profile uses an unregistered runtime");
                }
                agents
                    .entry(profile.id.clone())
                    .or_insert_with(|| Arc::new(AgentSlot::new(AgentState::new(Arc::new(profile)))));
            }
        }
        info!("Loaded {} agent profile(s)", count);
        self.rebuild_redactor();
        Ok(count)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn slot(&self, agent_id: &str) -> Result<Arc<AgentSlot>> {
        self.inner
            .agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::Agent(AgentError::NotFound(agent_id.to_string())))
    }

    fn adapter(&self, profile: &AgentProfile) -> Result<Arc<dyn RuntimeAdapter>> {
        self.inner
            .runtimes
            .get(&profile.runtime)
            .ok_or_else(|| Error::Agent(AgentError::UnknownRuntime(profile.runtime.clone())))
    }

    /// All agents, oldest profile first
    pub fn list(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> = self
            .inner
            .agents
            .read()
            .values()
            .map(|slot| slot.state.lock().clone())
            .collect();
        states.sort_by(|a, b| {
            a.profile
                .created_at
                .cmp(&b.profile.created_at)
                .then_with(|| a.profile.id.cmp(&b.profile.id))
        });
        states
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentState> {
        self.slot(agent_id).ok().map(|slot| slot.state.lock().clone())
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Move to `status`, emitting the edge; no-op when already there
    fn transition(&self, agent_id: &str, slot: &AgentSlot, status: AgentStatus) {
        let previous = {
            let mut state = slot.state.lock();
            let previous = state.status;
            if previous == status {
                return;
            }
            state.status = status;
            if status != AgentStatus::Error {
                state.error_message = None;
            }
            previous
        };
        debug!(agent_id = %agent_id, "{:?} -> {:?}", previous, status);
        self.inner.bus.emit(FleetEvent::StatusChanged {
            agent_id: agent_id.to_string(),
            status,
            previous,
        });
    }

    fn fail(&self, agent_id: &str, slot: &AgentSlot, message: impl Into<String>) {
        slot.state.lock().error_message = Some(message.into());
        self.transition(agent_id, slot, AgentStatus::Error);
        self.apply_visual_state(agent_id, slot, VisualState::Error);
    }

    fn apply_visual_state(&self, agent_id: &str, slot: &AgentSlot, visual: VisualState) {
        {
            let mut state = slot.state.lock();
            if state.visual_state == visual {
                return;
            }
            state.visual_state = visual;
        }
        self.inner.bus.emit(FleetEvent::VisualStateChanged {
            agent_id: agent_id.to_string(),
            state: visual,
        });
    }

    /// UI signalling only; never affects lifecycle status
    pub fn set_visual_state(&self, agent_id: &str, visual: VisualState) -> Result<()> {
        let slot = self.slot(agent_id)?;
        self.apply_visual_state(agent_id, &slot, visual);
        Ok(())
    }

    fn touch(slot: &AgentSlot) {
        slot.state.lock().last_activity = Some(chrono::Utc::now());
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn create(&self, input: NewAgentProfile) -> Result<String> {
        if input.name.trim().is_empty() {
            return Err(AgentError::InvalidProfile("name must not be empty".to_string()).into());
        }
        if !self.inner.runtimes.contains(&input.runtime) {
            return Err(AgentError::UnknownRuntime(input.runtime).into());
        }

        let profile = AgentProfile::from_input(input);
        self.inner.deps.profiles.save_profile(&profile).await?;

        let agent_id = profile.id.clone();
        info!(agent_id = %agent_id, "Created agent {} ({})", profile.name, profile.runtime);
        self.inner.agents.write().insert(
            agent_id.clone(),
            Arc::new(AgentSlot::new(AgentState::new(Arc::new(profile)))),
        );
        self.rebuild_redactor();
        Ok(agent_id)
    }

    /// Replace the whole profile record; identity and creation time are kept
    pub async fn update(&self, agent_id: &str, mut profile: AgentProfile) -> Result<()> {
        let slot = self.slot(agent_id)?;
        if !self.inner.runtimes.contains(&profile.runtime) {
            return Err(AgentError::UnknownRuntime(profile.runtime).into());
        }

        let current = slot.state.lock().profile.clone();
        profile.id = current.id.clone();
        profile.created_at = current.created_at;
        profile.updated_at = chrono::Utc::now();

        self.inner.deps.profiles.save_profile(&profile).await?;
        slot.state.lock().profile = Arc::new(profile);
        info!(agent_id = %agent_id, "Updated agent profile");
        self.rebuild_redactor();
        Ok(())
    }

    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        if slot.state.lock().profile.is_system {
            return Err(AgentError::SystemAgent(agent_id.to_string()).into());
        }

        self.inner.pty.remove(agent_id);
        slot.cancel_all();
        let pending: Vec<_> = slot.queue.lock().entries.drain(..).collect();
        for entry in pending {
            let _ = entry.reply.send(CommandOutcome::failed("Agent deleted"));
        }
        self.transition(agent_id, &slot, AgentStatus::Stopped);

        self.inner.agents.write().remove(agent_id);
        self.inner.deps.profiles.delete_profile(agent_id).await?;
        info!(agent_id = %agent_id, "Deleted agent");
        self.inner.bus.emit(FleetEvent::AgentDeleted {
            agent_id: agent_id.to_string(),
        });
        self.rebuild_redactor();
        Ok(())
    }

    /// Resolve secret bindings into env vars for a launch
    async fn secret_env(&self, profile: &AgentProfile) -> Result<HashMap<String, String>> {
        if profile.secret_bindings.is_empty() {
            return Ok(HashMap::new());
        }
        self.inner.deps.secrets.resolve(&profile.secret_bindings).await
    }

    pub async fn start(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let profile = {
            let state = slot.state.lock();
            if matches!(state.status, AgentStatus::Running | AgentStatus::Starting) {
                return Err(AgentError::AlreadyRunning(agent_id.to_string()).into());
            }
            state.profile.clone()
        };
        let adapter = self.adapter(&profile)?;

        self.transition(agent_id, &slot, AgentStatus::Starting);

        let secrets = match self.secret_env(&profile).await {
            Ok(secrets) => secrets,
            Err(e) => {
                error!(agent_id = %agent_id, "Secret resolution failed: {}", e);
                self.fail(agent_id, &slot, e.to_string());
                self.inner.bus.emit(FleetEvent::SpawnFailed {
                    agent_id: agent_id.to_string(),
                    message: e.to_string(),
                    tail: String::new(),
                });
                return Err(e);
            }
        };

        let spawn = adapter.build_spawn_config(&profile);
        let mut env = spawn.env;
        env.extend(profile.env.clone());
        env.extend(secrets);

        let request = PtySpawnRequest {
            agent_id: agent_id.to_string(),
            command: spawn.command,
            args: spawn.args,
            env,
            cwd: profile.cwd.clone(),
            cols: self.inner.config.pty_cols,
            rows: self.inner.config.pty_rows,
        };

        match self.inner.pty.spawn(request, self.exit_callback()) {
            Ok(pid) => {
                {
                    let mut state = slot.state.lock();
                    state.pid = pid;
                    state.started_at = Some(chrono::Utc::now());
                    state.last_activity = state.started_at;
                }
                // A process that died instantly has already moved us on
                if slot.state.lock().status == AgentStatus::Starting {
                    self.transition(agent_id, &slot, AgentStatus::Running);
                    self.apply_visual_state(agent_id, &slot, VisualState::Idle);
                }
                info!(agent_id = %agent_id, ?pid, "Agent started");
                Ok(())
            }
            Err(e) => {
                let (message, tail) = match &e {
                    Error::Spawn(spawn) => (spawn.message.clone(), spawn.tail.clone()),
                    other => (other.to_string(), String::new()),
                };
                error!(agent_id = %agent_id, "Agent failed to start: {}", message);
                self.fail(agent_id, &slot, message.clone());
                self.inner.bus.emit(FleetEvent::SpawnFailed {
                    agent_id: agent_id.to_string(),
                    message,
                    tail,
                });
                Err(e)
            }
        }
    }

    fn exit_callback(&self) -> ExitCallback {
        let weak: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        Arc::new(move |exit: PtyExit| {
            if let Some(inner) = weak.upgrade() {
                AgentSupervisor { inner }.handle_exit(exit);
            }
        })
    }

    /// Natural PTY exit; intentional kills never get here
    fn handle_exit(&self, exit: PtyExit) {
        let Ok(slot) = self.slot(&exit.agent_id) else {
            return;
        };
        let status = slot.state.lock().status;
        if !matches!(status, AgentStatus::Running | AgentStatus::Starting) {
            return;
        }
        slot.state.lock().pid = None;

        if exit.success {
            info!(agent_id = %exit.agent_id, "Agent exited cleanly");
            self.transition(&exit.agent_id, &slot, AgentStatus::Stopped);
            self.apply_visual_state(&exit.agent_id, &slot, VisualState::Offline);
            return;
        }

        let message = match exit.exit_code {
            Some(code) => format!("Process exited with code {}", code),
            None => "Process exited unexpectedly".to_string(),
        };
        warn!(agent_id = %exit.agent_id, "Agent crashed: {}", message);
        self.crash(&exit.agent_id, &slot, message, exit.exit_code);
    }

    fn crash(&self, agent_id: &str, slot: &AgentSlot, message: String, exit_code: Option<u32>) {
        self.fail(agent_id, slot, message);
        self.inner.bus.emit(FleetEvent::AgentCrashed {
            agent_id: agent_id.to_string(),
            exit_code,
            tail: self.inner.pty.tail(agent_id, self.inner.config.crash_tail_lines),
        });
    }

    pub async fn stop(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let killed = self.inner.pty.kill(agent_id);
        if !killed && slot.state.lock().status == AgentStatus::Stopped {
            return Err(AgentError::NotRunning(agent_id.to_string()).into());
        }

        slot.state.lock().pid = None;
        self.transition(agent_id, &slot, AgentStatus::Stopped);
        self.apply_visual_state(agent_id, &slot, VisualState::Offline);
        info!(agent_id = %agent_id, "Agent stopped");
        Ok(())
    }

    pub async fn restart(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        info!(agent_id = %agent_id, "Restarting agent");

        self.transition(agent_id, &slot, AgentStatus::Restarting);
        self.inner.pty.kill(agent_id);
        slot.state.lock().pid = None;
        self.transition(agent_id, &slot, AgentStatus::Stopped);

        tokio::time::sleep(self.inner.config.restart_settle()).await;
        self.start(agent_id).await
    }

    /// Start every agent flagged `auto_start`; returns how many came up
    pub async fn start_auto_agents(&self) -> usize {
        let ids: Vec<String> = self
            .list()
            .into_iter()
            .filter(|state| state.profile.auto_start && !state.is_running())
            .map(|state| state.profile.id.clone())
            .collect();

        let mut started = 0;
        for agent_id in ids {
            match self.start(&agent_id).await {
                Ok(()) => started += 1,
                Err(e) => warn!(agent_id = %agent_id, "Auto-start failed: {}", e),
            }
        }
        started
    }

    /// Stop everything, flushing pending PTY output first
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        let slots: Vec<(String, Arc<AgentSlot>)> = self
            .inner
            .agents
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        for (_, slot) in &slots {
            slot.cancel_all();
        }
        self.inner.pty.kill_all();
        for (agent_id, slot) in &slots {
            slot.state.lock().pid = None;
            self.transition(agent_id, slot, AgentStatus::Stopped);
            self.apply_visual_state(agent_id, slot, VisualState::Offline);
        }
    }

    // ========================================================================
    // Interactive mode
    // ========================================================================

    /// Write a line of input to the agent's terminal
    pub fn send_input(&self, agent_id: &str, text: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let profile = slot.state.lock().profile.clone();
        let adapter = self.adapter(&profile)?;
        self.inner.pty.write(agent_id, &adapter.format_input(text))?;
        Self::touch(&slot);
        Ok(())
    }

    pub fn resize(&self, agent_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.slot(agent_id)?;
        self.inner.pty.resize(agent_id, cols, rows)
    }

    pub fn get_scrollback(&self, agent_id: &str) -> Vec<String> {
        self.inner.pty.scrollback(agent_id)
    }

    pub fn get_output_tail(&self, agent_id: &str, lines: usize) -> Vec<String> {
        self.inner.pty.tail(agent_id, lines)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Find agents marked running whose process is gone; returns their ids
    pub fn check_agent_health(&self) -> Vec<String> {
        let running: Vec<(String, Arc<AgentSlot>)> = self
            .inner
            .agents
            .read()
            .iter()
            .filter(|(_, slot)| slot.state.lock().status == AgentStatus::Running)
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut dead = Vec::new();
        for (agent_id, slot) in running {
            if self.inner.pty.is_alive(&agent_id) {
                continue;
            }
            warn!(agent_id = %agent_id, "Agent process is no longer running");
            slot.state.lock().pid = None;
            self.crash(&agent_id, &slot, "Process is no longer running".to_string(), None);
            dead.push(agent_id);
        }
        dead
    }

    pub fn spawn_agent_health_check(&self) -> PeriodicTask {
        let supervisor = self.clone();
        PeriodicTask::spawn(
            "agent-health",
            self.inner.config.agent_health_interval(),
            move || {
                let supervisor = supervisor.clone();
                async move {
                    supervisor.check_agent_health();
                }
            },
        )
    }

    // ========================================================================
    // Redaction
    // ========================================================================

    fn redactor(&self) -> Arc<SecretRedactor> {
        self.inner.redactor.read().clone()
    }

    /// Rebuild the redactor in the background; failures are only logged
    fn rebuild_redactor(&self) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.refresh_redactor().await {
                warn!("Failed to rebuild secret redactor: {}", e);
            }
        });
    }

    /// Rebuild the redactor from the current secret values
    pub async fn refresh_redactor(&self) -> Result<()> {
        let values = self.inner.deps.secret_values.secret_values().await?;
        let redactor = SecretRedactor::new(values);
        debug!("Redactor rebuilt (empty: {})", redactor.is_empty());
        *self.inner.redactor.write() = Arc::new(redactor);
        Ok(())
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn load_conversation_history(&self, query: HistoryQuery) -> Result<HistoryPage> {
        self.inner.deps.conversations.load(&query).await
    }

    /// Two strictly increasing timestamps for one exchange
    fn exchange_timestamps(&self) -> (i64, i64) {
        let mut last = self.inner.last_timestamp.lock();
        let user = chrono::Utc::now().timestamp_millis().max(*last + 1);
        let reply = user + 1;
        *last = reply;
        (user, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockProfileStore, MockSecretValuesProvider};
    use crate::runtime::{ExecuteOptions, ShellRuntime, SpawnConfig};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Points at a binary that does not exist
    struct MissingBinaryRuntime;

    #[async_trait]
    impl RuntimeAdapter for MissingBinaryRuntime {
        fn kind(&self) -> &str {
            "missing"
        }

        fn display_name(&self) -> &str {
            "Missing"
        }

        fn build_spawn_config(&self, _profile: &AgentProfile) -> SpawnConfig {
            SpawnConfig::new("/nonexistent/overseer-missing-binary")
        }

        async fn execute(&self, _profile: &AgentProfile, _text: &str, _options: ExecuteOptions) -> CommandOutcome {
            CommandOutcome::failed("not installed")
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    fn supervisor_full(config: SupervisorConfig, deps: SupervisorDeps) -> AgentSupervisor {
        let mut runtimes = RuntimeRegistry::new();
        runtimes.register(Arc::new(ShellRuntime::new()));
        runtimes.register(Arc::new(MissingBinaryRuntime));
        AgentSupervisor::new(config, EventBus::new(), runtimes, deps)
    }

    fn supervisor_with(deps: SupervisorDeps) -> AgentSupervisor {
        supervisor_full(SupervisorConfig::default(), deps)
    }

    fn supervisor_with_config(config: SupervisorConfig) -> AgentSupervisor {
        supervisor_full(config, SupervisorDeps::with_storage(Storage::in_memory().unwrap()))
    }

    fn supervisor() -> AgentSupervisor {
        supervisor_with_config(SupervisorConfig::default())
    }

    async fn shell_agent(supervisor: &AgentSupervisor, script: &str) -> String {
        let mut input = NewAgentProfile::new("sh", "shell", std::env::temp_dir());
        input.extra_args = vec!["-c".to_string(), script.to_string()];
        supervisor.create(input).await.unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    fn drain(events: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn transitions(events: &[FleetEvent]) -> Vec<(AgentStatus, AgentStatus)> {
        events
            .iter()
            .filter_map(|event| match event {
                FleetEvent::StatusChanged { status, previous, .. } => Some((*previous, *status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_runtime() {
        let supervisor = supervisor();
        let err = supervisor
            .create(NewAgentProfile::new("x", "nonexistent", "/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::UnknownRuntime(_))));
        assert!(supervisor.list().is_empty());
    }

    #[tokio::test]
    async fn test_create_persists_profile() {
        let mut profiles = MockProfileStore::new();
        profiles.expect_save_profile().times(1).returning(|_| Ok(()));
        let storage = Arc::new(Storage::in_memory().unwrap());
        let supervisor = supervisor_with(SupervisorDeps::new(Arc::new(profiles), storage));

        let id = supervisor
            .create(NewAgentProfile::new("Builder", "shell", "/tmp"))
            .await
            .unwrap();
        let state = supervisor.get(&id).unwrap();
        assert_eq!(state.status, AgentStatus::Stopped);
        assert_eq!(state.profile.name, "Builder");
    }

    #[tokio::test]
    async fn test_system_agent_cannot_be_deleted() {
        let supervisor = supervisor();
        let mut input = NewAgentProfile::new("Core", "shell", "/tmp");
        input.is_system = true;
        let id = supervisor.create(input).await.unwrap();

        let err = supervisor.delete(&id).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::SystemAgent(_))));
        assert!(supervisor.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_rejected() {
        let supervisor = supervisor();
        let id = supervisor
            .create(NewAgentProfile::new("a", "shell", "/tmp"))
            .await
            .unwrap();
        let err = supervisor.stop(&id).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::NotRunning(_))));
        assert!(matches!(
            supervisor.start("missing").await,
            Err(Error::Agent(AgentError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let supervisor = supervisor();
        let id = supervisor
            .create(NewAgentProfile::new("a", "shell", "/tmp"))
            .await
            .unwrap();
        let before = supervisor.get(&id).unwrap().profile;

        let mut replacement = AgentProfile::from_input(NewAgentProfile::new("renamed", "shell", "/var"));
        replacement.color = Some("#ff0000".to_string());
        supervisor.update(&id, replacement).await.unwrap();

        let after = supervisor.get(&id).unwrap().profile;
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.name, "renamed");
        assert_eq!(after.color.as_deref(), Some("#ff0000"));
    }

    #[tokio::test]
    async fn test_refresh_redactor() {
        let mut values = MockSecretValuesProvider::new();
        values
            .expect_secret_values()
            .returning(|| Ok(vec!["hunter2hunter2".to_string()]));
        let storage = Arc::new(Storage::in_memory().unwrap());
        let deps = SupervisorDeps::new(storage.clone(), storage)
            .with_secrets(Arc::new(EnvSecretResolver::new()), Arc::new(values));
        let supervisor = supervisor_with(deps);

        supervisor.refresh_redactor().await.unwrap();
        assert_eq!(supervisor.redactor().redact("pw=hunter2hunter2"), "pw=[REDACTED]");
    }

    #[test]
    fn test_exchange_timestamps_strictly_increase() {
        let supervisor = supervisor();
        let (a, b) = supervisor.exchange_timestamps();
        let (c, d) = supervisor.exchange_timestamps();
        assert!(a < b && b < c && c < d);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stop_lifecycle() {
        let supervisor = supervisor();
        let mut input = NewAgentProfile::new("sh", "shell", std::env::temp_dir());
        input.extra_args = vec!["-c".to_string(), "sleep 30".to_string()];
        let id = supervisor.create(input).await.unwrap();
        let mut events = supervisor.bus().subscribe();

        supervisor.start(&id).await.unwrap();
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Running);
        assert!(supervisor.get(&id).unwrap().pid.is_some());
        assert!(matches!(
            supervisor.start(&id).await,
            Err(Error::Agent(AgentError::AlreadyRunning(_)))
        ));

        supervisor.stop(&id).await.unwrap();
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Stopped);

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let FleetEvent::StatusChanged { status, previous, .. } = event {
                transitions.push((previous, status));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (AgentStatus::Stopped, AgentStatus::Starting),
                (AgentStatus::Starting, AgentStatus::Running),
                (AgentStatus::Running, AgentStatus::Stopped),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_nonzero_exit_is_a_crash() {
        let supervisor = supervisor();
        let mut input = NewAgentProfile::new("sh", "shell", std::env::temp_dir());
        input.extra_args = vec!["-c".to_string(), "echo dying; sleep 0.3; exit 4".to_string()];
        let id = supervisor.create(input).await.unwrap();
        let mut events = supervisor.bus().subscribe();

        supervisor.start(&id).await.unwrap();

        let crash = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                if let Ok(FleetEvent::AgentCrashed { exit_code, tail, .. }) = events.recv().await {
                    return (exit_code, tail);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(crash.0, Some(4));
        assert!(crash.1.iter().any(|line| line.contains("dying")));
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_delete_announces_removal() {
        let supervisor = supervisor();
        let id = supervisor
            .create(NewAgentProfile::new("gone", "shell", "/tmp"))
            .await
            .unwrap();
        let mut events = supervisor.bus().subscribe();

        supervisor.delete(&id).await.unwrap();

        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, FleetEvent::AgentDeleted { agent_id } if agent_id == &id)));
        assert!(supervisor.get(&id).is_none());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_default_deps_redact_bound_secrets() {
        std::env::set_var("OVERSEER_TEST_AGENT_TOKEN", "sup3r-s3cret-value");
        let supervisor = supervisor();
        let mut input = NewAgentProfile::new("leaky", "shell", std::env::temp_dir());
        input.secret_bindings = HashMap::from([(
            "TOKEN".to_string(),
            "OVERSEER_TEST_AGENT_TOKEN".to_string(),
        )]);
        let id = supervisor.create(input).await.unwrap();
        supervisor.refresh_redactor().await.unwrap();

        let outcome = supervisor
            .enqueue_command(&id, "echo token=$TOKEN", CommandSource::Text, EnqueueOptions::default())
            .unwrap()
            .wait()
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.text, "token=[REDACTED]");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_passes_through_restarting() {
        let supervisor = supervisor_with_config(SupervisorConfig {
            restart_settle_ms: 100,
            ..Default::default()
        });
        let id = shell_agent(&supervisor, "sleep 30").await;
        supervisor.start(&id).await.unwrap();
        let first_pid = supervisor.get(&id).unwrap().pid;
        let mut events = supervisor.bus().subscribe();

        let began = std::time::Instant::now();
        supervisor.restart(&id).await.unwrap();
        assert!(began.elapsed() >= Duration::from_millis(100));

        let state = supervisor.get(&id).unwrap();
        assert_eq!(state.status, AgentStatus::Running);
        assert!(state.pid.is_some());
        assert_ne!(state.pid, first_pid);
        assert_eq!(
            transitions(&drain(&mut events)),
            vec![
                (AgentStatus::Running, AgentStatus::Restarting),
                (AgentStatus::Restarting, AgentStatus::Stopped),
                (AgentStatus::Stopped, AgentStatus::Starting),
                (AgentStatus::Starting, AgentStatus::Running),
            ]
        );

        supervisor.stop(&id).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health_check_catches_silent_death() {
        let supervisor = supervisor();
        let id = shell_agent(&supervisor, "echo booted; sleep 30").await;
        supervisor.start(&id).await.unwrap();
        wait_until(|| supervisor.get_scrollback(&id).iter().any(|l| l.contains("booted"))).await;

        // Gone without an exit report: the supervisor still believes it runs
        assert!(supervisor.inner.pty.kill(&id));
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Running);
        let mut events = supervisor.bus().subscribe();

        assert_eq!(supervisor.check_agent_health(), vec![id.clone()]);

        let state = supervisor.get(&id).unwrap();
        assert_eq!(state.status, AgentStatus::Error);
        assert!(state.pid.is_none());
        let crash = drain(&mut events).into_iter().find_map(|e| match e {
            FleetEvent::AgentCrashed { exit_code, tail, .. } => Some((exit_code, tail)),
            _ => None,
        });
        let (exit_code, tail) = crash.unwrap();
        assert_eq!(exit_code, None);
        assert!(tail.iter().any(|l| l.contains("booted")));

        assert!(supervisor.check_agent_health().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_failure_reports_bounded_tail() {
        let supervisor = supervisor_with_config(SupervisorConfig {
            spawn_error_tail_chars: 32,
            ..Default::default()
        });
        let id = shell_agent(
            &supervisor,
            "for i in 1 2 3 4 5 6 7 8 9 10; do echo line-$i-of-output; done",
        )
        .await;
        supervisor.start(&id).await.unwrap();
        wait_until(|| {
            supervisor.get(&id).unwrap().status == AgentStatus::Stopped
                && supervisor
                    .get_scrollback(&id)
                    .iter()
                    .any(|l| l.contains("line-10-of-output"))
        })
        .await;

        let mut profile = (*supervisor.get(&id).unwrap().profile).clone();
        profile.runtime = "missing".to_string();
        supervisor.update(&id, profile).await.unwrap();
        let mut events = supervisor.bus().subscribe();

        let err = supervisor.start(&id).await.unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Error);

        let (message, tail) = drain(&mut events)
            .into_iter()
            .find_map(|e| match e {
                FleetEvent::SpawnFailed { message, tail, .. } => Some((message, tail)),
                _ => None,
            })
            .unwrap();
        assert!(!message.is_empty());
        assert!(tail.chars().count() <= 32);
        assert!(tail.contains("of-output"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_flushes_pending_output() {
        let supervisor = supervisor_with_config(SupervisorConfig {
            flush_interval_ms: 60_000,
            ..Default::default()
        });
        let id = shell_agent(&supervisor, "echo ready-to-flush; sleep 30").await;
        let mut events = supervisor.bus().subscribe();

        supervisor.start(&id).await.unwrap();
        wait_until(|| supervisor.get_scrollback(&id).iter().any(|l| l.contains("ready-to-flush"))).await;
        // Scrollback is written just before the batcher
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = drain(&mut events);
        assert!(!before.iter().any(|e| matches!(e, FleetEvent::PtyOutput { .. })));

        supervisor.shutdown().await;

        let flushed: String = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                FleetEvent::PtyOutput { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert!(flushed.contains("ready-to-flush"));
        assert_eq!(supervisor.get(&id).unwrap().status, AgentStatus::Stopped);
    }
}

//! Turn-based command execution
//!
//! Each agent has one FIFO and at most one worker draining it. The first
//! command for an idle agent is handed straight to a new worker; later ones
//! wait in the queue. The worker clears the processing flag under the queue
//! lock once the queue is empty, so a submission never slips between
//! "queue empty" and "worker gone".

use super::slot::{AgentSlot, QueuedCommand};
use super::AgentSupervisor;
use crate::error::{AgentError, ExecutionError, Result};
use crate::redact::sanitize_result_text;
use crate::runtime::{ExecuteOptions, OutputFn, ProgressFn};
use crate::types::*;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ACK_PHRASES: &[&str] = &[
    "On it.",
    "Got it.",
    "Working on it.",
    "Sure thing.",
    "Right away.",
    "Looking into it.",
    "Okay, starting now.",
    "Copy that.",
];

fn ack_phrase() -> &'static str {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    ACK_PHRASES[bytes[0] as usize % ACK_PHRASES.len()]
}

async fn settle(rx: oneshot::Receiver<CommandOutcome>) -> CommandOutcome {
    rx.await
        .unwrap_or_else(|_| CommandOutcome::failed(ExecutionError::Dropped.to_string()))
}

/// A command accepted into an agent's queue
#[derive(Debug)]
pub struct EnqueuedCommand {
    /// 0 when it started immediately, otherwise how many commands run first
    pub queue_position: usize,
    result: oneshot::Receiver<CommandOutcome>,
}

impl EnqueuedCommand {
    /// Wait for the command to settle; never hangs on a dropped worker
    pub async fn wait(self) -> CommandOutcome {
        settle(self.result).await
    }
}

/// An execution running outside the agent's queue
#[derive(Debug)]
pub struct DetachedCommand {
    /// Pass to `abort_detached` to cancel
    pub key: String,
    result: oneshot::Receiver<CommandOutcome>,
}

impl DetachedCommand {
    pub async fn wait(self) -> CommandOutcome {
        settle(self.result).await
    }
}

/// Where a finished turn's bookkeeping goes
#[derive(Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Queued,
    Detached,
}

impl AgentSupervisor {
    /// Queue a command; it runs after every command already queued for the agent
    pub fn enqueue_command(
        &self,
        agent_id: &str,
        text: &str,
        source: CommandSource,
        options: EnqueueOptions,
    ) -> Result<EnqueuedCommand> {
        let slot = self.slot(agent_id)?;
        let (reply, result) = oneshot::channel();
        let entry = QueuedCommand {
            text: text.to_string(),
            source,
            hidden: options.hidden,
            reply,
        };

        let (queue_position, first) = {
            let mut queue = slot.queue.lock();
            if queue.processing {
                queue.entries.push_back(entry);
                (queue.entries.len(), None)
            } else {
                queue.processing = true;
                // Leftovers from a worker that died go first
                queue.entries.push_back(entry);
                let first = queue.entries.pop_front();
                (queue.entries.len(), first)
            }
        };

        debug!(agent_id = %agent_id, queue_position, "Command enqueued");
        if let Some(first) = first {
            let supervisor = self.clone();
            let agent_id = agent_id.to_string();
            tokio::spawn(async move { supervisor.drain(agent_id, slot, first).await });
        }

        Ok(EnqueuedCommand {
            queue_position,
            result,
        })
    }

    /// The single worker for one agent's queue
    async fn drain(self, agent_id: String, slot: Arc<AgentSlot>, first: QueuedCommand) {
        let mut next = Some(first);
        while let Some(entry) = next {
            let run = AssertUnwindSafe(self.run_queued(&agent_id, &slot, entry)).catch_unwind();
            if run.await.is_err() {
                error!(agent_id = %agent_id, "Command execution panicked");
                if let Some(task) = slot.task.lock().as_mut() {
                    task.finish(TaskStatus::Failed);
                }
                self.apply_visual_state(&agent_id, &slot, VisualState::Error);
            }

            next = {
                let mut queue = slot.queue.lock();
                match queue.entries.pop_front() {
                    Some(entry) => {
                        self.inner.bus.emit(FleetEvent::QueueUpdate {
                            agent_id: agent_id.clone(),
                            remaining: queue.entries.len(),
                        });
                        Some(entry)
                    }
                    None => {
                        queue.processing = false;
                        None
                    }
                }
            };
        }
        debug!(agent_id = %agent_id, "Queue drained");
    }

    async fn run_queued(&self, agent_id: &str, slot: &Arc<AgentSlot>, entry: QueuedCommand) {
        self.inner.bus.emit(FleetEvent::CommandAck {
            agent_id: agent_id.to_string(),
            phrase: ack_phrase().to_string(),
        });

        let task = TaskInfo::start(&entry.text);
        let task_id = task.task_id.clone();
        *slot.task.lock() = Some(task);
        self.apply_visual_state(agent_id, slot, VisualState::Thinking);

        let (generation, cancel) = slot.arm();
        let outcome = self
            .execute_turn(agent_id, slot, &entry.text, cancel, Some(task_id), TurnKind::Queued)
            .await;
        slot.disarm(generation);

        if let Some(task) = slot.task.lock().as_mut() {
            task.finish(if outcome.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            });
        }
        let visual = if slot.state.lock().status == AgentStatus::Error {
            VisualState::Error
        } else {
            VisualState::Idle
        };
        self.apply_visual_state(agent_id, slot, visual);

        self.finish_turn(agent_id, &entry.text, entry.source, entry.hidden, &outcome);
        if entry.reply.send(outcome).is_err() {
            debug!(agent_id = %agent_id, "Command result dropped by caller");
        }
    }

    /// Context, adapter call, sanitation; shared by queued and detached turns
    async fn execute_turn(
        &self,
        agent_id: &str,
        slot: &Arc<AgentSlot>,
        text: &str,
        cancel: CancellationToken,
        task_id: Option<String>,
        kind: TurnKind,
    ) -> CommandOutcome {
        let profile = slot.state.lock().profile.clone();
        let adapter = match self.adapter(&profile) {
            Ok(adapter) => adapter,
            Err(e) => return CommandOutcome::failed(e.to_string()),
        };

        let profile = match self.inner.deps.context.build_context(profile.clone(), text).await {
            Ok(enriched) => enriched,
            Err(e) => {
                warn!(agent_id = %agent_id, "Context enrichment failed: {}", e);
                profile
            }
        };
        let profile = match self.secret_env(&profile).await {
            Ok(secrets) if !secrets.is_empty() => {
                let mut with_secrets = (*profile).clone();
                with_secrets.env.extend(secrets);
                Arc::new(with_secrets)
            }
            Ok(_) => profile,
            Err(e) => {
                warn!(agent_id = %agent_id, "Secret resolution failed: {}", e);
                profile
            }
        };

        let mut options = ExecuteOptions::new(cancel.clone()).with_output(self.output_fn(agent_id));
        if let Some(task_id) = task_id {
            options = options.with_progress(self.progress_fn(agent_id, slot, task_id));
        }
        if kind == TurnKind::Queued {
            options.session_id = slot.session_id.lock().clone();
        }

        info!(agent_id = %agent_id, runtime = %profile.runtime, "Executing command");
        let mut outcome = adapter.execute(&profile, text, options).await;
        Self::touch(slot);

        if cancel.is_cancelled() {
            outcome = CommandOutcome {
                session_id: outcome.session_id,
                ..CommandOutcome::failed(ExecutionError::Cancelled.to_string())
            };
        }

        if kind == TurnKind::Queued {
            if let Some(session_id) = &outcome.session_id {
                *slot.session_id.lock() = Some(session_id.clone());
            }
        }

        let redactor = self.redactor();
        outcome.text = redactor.redact(&sanitize_result_text(&outcome.text));
        outcome.error = outcome.error.map(|e| redactor.redact(&e));

        if !outcome.success {
            warn!(
                agent_id = %agent_id,
                "Command failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        outcome
    }

    fn output_fn(&self, agent_id: &str) -> OutputFn {
        let supervisor = self.clone();
        let agent_id = agent_id.to_string();
        Arc::new(move |chunk: &str| {
            supervisor.inner.bus.emit(FleetEvent::CommandOutput {
                agent_id: agent_id.clone(),
                chunk: supervisor.redactor().redact(chunk),
            });
        })
    }

    fn progress_fn(&self, agent_id: &str, slot: &Arc<AgentSlot>, task_id: String) -> ProgressFn {
        let bus = self.inner.bus.clone();
        let slot = Arc::clone(slot);
        let agent_id = agent_id.to_string();
        Arc::new(move |step: TaskStep| {
            if let Some(task) = slot
                .task
                .lock()
                .as_mut()
                .filter(|task| task.task_id == task_id)
            {
                task.steps.push(step.clone());
            }
            bus.emit(FleetEvent::TaskStep {
                agent_id: agent_id.clone(),
                task_id: task_id.clone(),
                step,
            });
        })
    }

    /// Publish the result and record both sides of the exchange
    fn finish_turn(
        &self,
        agent_id: &str,
        text: &str,
        source: CommandSource,
        hidden: bool,
        outcome: &CommandOutcome,
    ) {
        self.inner.bus.emit(FleetEvent::CommandResult {
            agent_id: agent_id.to_string(),
            outcome: outcome.clone(),
            hidden,
        });

        let reply = if outcome.success {
            outcome.text.clone()
        } else {
            format!("Error: {}", outcome.error.as_deref().unwrap_or("unknown error"))
        };
        let (user_at, reply_at) = self.exchange_timestamps();
        let entries = vec![
            ConversationEntry::new(agent_id, ConversationRole::User, text, source, hidden, user_at),
            ConversationEntry::new(agent_id, ConversationRole::Assistant, reply, source, hidden, reply_at),
        ];

        let store = Arc::clone(&self.inner.deps.conversations);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.append(entries).await {
                warn!(agent_id = %agent_id, "Failed to record conversation: {}", e);
            }
        });
    }

    /// Cancel the agent's in-flight command; queued ones still run
    pub fn abort_task(&self, agent_id: &str) -> bool {
        let Ok(slot) = self.slot(agent_id) else {
            return false;
        };
        let Some(active) = slot.active.lock().take() else {
            return false;
        };
        active.cancel.cancel();

        if let Some(task) = slot.task.lock().as_mut() {
            task.finish(TaskStatus::Failed);
        }
        info!(agent_id = %agent_id, "Command aborted");
        true
    }

    /// Current (or most recent) task for the agent
    pub fn get_task_status(&self, agent_id: &str) -> Option<TaskInfo> {
        self.slot(agent_id).ok()?.task.lock().clone()
    }

    /// Run a command outside the queue, e.g. for scheduled background work
    ///
    /// It neither waits for nor blocks queued commands, and its conversation
    /// record is hidden.
    pub fn execute_detached(&self, agent_id: &str, text: &str) -> Result<DetachedCommand> {
        let slot = self.slot(agent_id)?;
        let key = format!("{}::detached::{}", agent_id, uuid::Uuid::new_v4());
        let cancel = CancellationToken::new();
        slot.detached.lock().insert(key.clone(), cancel.clone());

        let (reply, result) = oneshot::channel();
        let supervisor = self.clone();
        let agent_id = agent_id.to_string();
        let text = text.to_string();
        let task_key = key.clone();
        tokio::spawn(async move {
            let outcome = supervisor
                .execute_turn(&agent_id, &slot, &text, cancel, None, TurnKind::Detached)
                .await;
            slot.detached.lock().remove(&task_key);
            supervisor.finish_turn(&agent_id, &text, CommandSource::Text, true, &outcome);
            let _ = reply.send(outcome);
        });

        Ok(DetachedCommand { key, result })
    }

    /// Cancel one detached execution by key
    pub fn abort_detached(&self, key: &str) -> Result<bool> {
        let agent_id = key
            .split_once("::detached::")
            .map(|(agent_id, _)| agent_id)
            .ok_or_else(|| AgentError::NotFound(key.to_string()))?;
        let slot = self.slot(agent_id)?;
        let token = slot.detached.lock().remove(key);
        Ok(match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::events::EventBus;
    use crate::runtime::{RuntimeAdapter, RuntimeRegistry, SpawnConfig};
    use crate::storage::Storage;
    use crate::supervisor::SupervisorDeps;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Echoes the command; "block" waits until released or cancelled
    struct ScriptedRuntime {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        release: Notify,
    }

    impl ScriptedRuntime {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl RuntimeAdapter for ScriptedRuntime {
        fn kind(&self) -> &str {
            "scripted"
        }

        fn display_name(&self) -> &str {
            "Scripted"
        }

        fn build_spawn_config(&self, _profile: &AgentProfile) -> SpawnConfig {
            SpawnConfig::new("true")
        }

        async fn execute(&self, _profile: &AgentProfile, text: &str, options: ExecuteOptions) -> CommandOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            options.progress(TaskStepKind::Thinking, "thinking");

            let outcome = if text.starts_with("block") {
                tokio::select! {
                    _ = options.cancel.cancelled() => CommandOutcome::failed("Cancelled"),
                    _ = self.release.notified() => CommandOutcome::ok(text, None),
                }
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
                CommandOutcome::ok(format!("done: {}", text), Some("sess-1".to_string()))
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    async fn setup() -> (AgentSupervisor, Arc<ScriptedRuntime>, String) {
        let runtime = ScriptedRuntime::new();
        let mut runtimes = RuntimeRegistry::new();
        runtimes.register(runtime.clone());
        let supervisor = AgentSupervisor::new(
            SupervisorConfig::default(),
            EventBus::new(),
            runtimes,
            SupervisorDeps::with_storage(Storage::in_memory().unwrap()),
        );
        let id = supervisor
            .create(NewAgentProfile::new("a", "scripted", "/tmp"))
            .await
            .unwrap();
        (supervisor, runtime, id)
    }

    #[tokio::test]
    async fn test_commands_run_one_at_a_time_in_order() {
        let (supervisor, runtime, id) = setup().await;

        let handles: Vec<_> = (0..5)
            .map(|i| {
                supervisor
                    .enqueue_command(&id, &format!("cmd {}", i), CommandSource::Text, EnqueueOptions::default())
                    .unwrap()
            })
            .collect();

        let positions: Vec<_> = handles.iter().map(|h| h.queue_position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);

        let mut texts = Vec::new();
        for handle in handles {
            texts.push(handle.wait().await.text);
        }
        assert_eq!(texts, vec!["done: cmd 0", "done: cmd 1", "done: cmd 2", "done: cmd 3", "done: cmd 4"]);
        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queue_update_fires_before_next_command() {
        let (supervisor, _runtime, id) = setup().await;
        let mut events = supervisor.bus().subscribe();

        let first = supervisor
            .enqueue_command(&id, "fix bug", CommandSource::Text, EnqueueOptions::default())
            .unwrap();
        let second = supervisor
            .enqueue_command(&id, "status", CommandSource::Text, EnqueueOptions::default())
            .unwrap();
        assert_eq!(second.queue_position, 1);

        first.wait().await;
        second.wait().await;

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                FleetEvent::CommandResult { outcome, .. } => order.push(format!("result {}", outcome.text)),
                FleetEvent::QueueUpdate { remaining, .. } => order.push(format!("queue {}", remaining)),
                FleetEvent::CommandAck { .. } => order.push("ack".to_string()),
                _ => {}
            }
        }
        assert_eq!(
            order,
            vec!["ack", "result done: fix bug", "queue 0", "ack", "result done: status"]
        );
    }

    #[tokio::test]
    async fn test_abort_does_not_truncate_queue() {
        let (supervisor, _runtime, id) = setup().await;

        let blocked = supervisor
            .enqueue_command(&id, "block forever", CommandSource::Voice, EnqueueOptions::default())
            .unwrap();
        let queued = supervisor
            .enqueue_command(&id, "after", CommandSource::Text, EnqueueOptions::default())
            .unwrap();

        // Let the worker pick up the first command
        while supervisor.get_task_status(&id).is_none() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(supervisor.abort_task(&id));
        assert_eq!(
            supervisor.get_task_status(&id).unwrap().status,
            TaskStatus::Failed
        );

        let outcome = blocked.wait().await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Command cancelled"));

        let outcome = queued.wait().await;
        assert!(outcome.success);
        assert_eq!(outcome.text, "done: after");
        assert!(!supervisor.abort_task(&id));
    }

    #[tokio::test]
    async fn test_detached_runs_alongside_queue() {
        let (supervisor, runtime, id) = setup().await;

        let blocked = supervisor
            .enqueue_command(&id, "block", CommandSource::Text, EnqueueOptions::default())
            .unwrap();
        let detached = supervisor.execute_detached(&id, "background").unwrap();
        assert!(detached.key.starts_with(&format!("{}::detached::", id)));

        let outcome = tokio::time::timeout(Duration::from_secs(5), detached.wait())
            .await
            .unwrap();
        assert_eq!(outcome.text, "done: background");

        runtime.release.notify_one();
        assert!(blocked.wait().await.success);
    }

    #[tokio::test]
    async fn test_abort_detached() {
        let (supervisor, _runtime, id) = setup().await;
        let detached = supervisor.execute_detached(&id, "block detached").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(supervisor.abort_detached(&detached.key).unwrap());
        let outcome = detached.wait().await;
        assert!(!outcome.success);
        assert!(supervisor.abort_detached("bogus").is_err());
    }

    #[tokio::test]
    async fn test_task_tracks_progress_and_session() {
        let (supervisor, _runtime, id) = setup().await;
        supervisor
            .enqueue_command(&id, "hello", CommandSource::Text, EnqueueOptions::default())
            .unwrap()
            .wait()
            .await;

        let task = supervisor.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.command, "hello");
        assert_eq!(task.steps.len(), 1);
        assert_eq!(task.steps[0].kind, TaskStepKind::Thinking);
    }

    #[tokio::test]
    async fn test_conversation_recorded_in_order() {
        let (supervisor, _runtime, id) = setup().await;
        supervisor
            .enqueue_command(&id, "one", CommandSource::Voice, EnqueueOptions { hidden: true })
            .unwrap()
            .wait()
            .await;

        let mut page = HistoryPage::default();
        for _ in 0..100 {
            page = supervisor
                .load_conversation_history(HistoryQuery {
                    agent_id: Some(id.clone()),
                    ..Default::default()
                })
                .await
                .unwrap();
            if page.entries.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let entries: Vec<_> = page.entries.iter().map(|e| (e.role, e.text.as_str(), e.hidden)).collect();
        assert_eq!(
            entries,
            vec![
                (ConversationRole::User, "one", true),
                (ConversationRole::Assistant, "done: one", true),
            ]
        );
        assert!(page.entries[0].timestamp_ms < page.entries[1].timestamp_ms);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_agent() {
        let (supervisor, _runtime, _id) = setup().await;
        assert!(supervisor
            .enqueue_command("nope", "x", CommandSource::Text, EnqueueOptions::default())
            .is_err());
    }
}

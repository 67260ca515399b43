//! Runtime adapter capability interface
//!
//! Every CLI tool the supervisor can drive implements `RuntimeAdapter`:
//! - How to launch it in a PTY for interactive use
//! - How to format keystrokes for it
//! - How to read its structured output
//! - How to run a single command turn to completion

use crate::types::{AgentProfile, CommandOutcome, TaskStep, TaskStepKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Command line for an interactive PTY session
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl SpawnConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

pub type ProgressFn = Arc<dyn Fn(TaskStep) + Send + Sync>;
pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call options for `RuntimeAdapter::execute`
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub cancel: CancellationToken,
    /// Resume a previous CLI session when the runtime supports it
    pub session_id: Option<String>,
    pub on_progress: Option<ProgressFn>,
    pub on_output: Option<OutputFn>,
}

impl ExecuteOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, f: ProgressFn) -> Self {
        self.on_progress = Some(f);
        self
    }

    pub fn with_output(mut self, f: OutputFn) -> Self {
        self.on_output = Some(f);
        self
    }

    pub fn progress(&self, kind: TaskStepKind, summary: impl Into<String>) {
        if let Some(f) = &self.on_progress {
            f(TaskStep::new(kind, summary));
        }
    }

    pub fn output(&self, chunk: &str) {
        if let Some(f) = &self.on_output {
            f(chunk);
        }
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// One interpreted line of runtime output
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(TaskStepKind, String),
    Text(String),
    SessionStarted(String),
    Final {
        text: String,
        session_id: Option<String>,
        is_error: bool,
    },
}

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Registry key, e.g. "claude-code"
    fn kind(&self) -> &str;

    fn display_name(&self) -> &str;

    fn build_spawn_config(&self, profile: &AgentProfile) -> SpawnConfig;

    /// Bytes to write to the PTY for one line of user input
    fn format_input(&self, text: &str) -> String {
        format!("{}\r", text)
    }

    /// Interpret one line of one-shot output; `None` means ignore it
    fn parse_output(&self, line: &str) -> Option<ParsedLine> {
        let line = line.trim_end();
        if line.is_empty() {
            None
        } else {
            Some(ParsedLine::Text(line.to_string()))
        }
    }

    /// Run one command turn to completion
    ///
    /// Never returns an error: failures and cancellation are reported through
    /// `CommandOutcome { success: false, .. }`.
    async fn execute(
        &self,
        profile: &AgentProfile,
        text: &str,
        options: ExecuteOptions,
    ) -> CommandOutcome;

    /// Whether the CLI is installed
    async fn is_available(&self) -> bool;
}

/// Adapters keyed by runtime kind
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    adapters: HashMap<String, Arc<dyn RuntimeAdapter>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all builtin runtimes
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::ClaudeCodeRuntime::new()));
        registry.register(Arc::new(super::CodexRuntime::new()));
        registry.register(Arc::new(super::GeminiRuntime::new()));
        registry.register(Arc::new(super::ShellRuntime::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn RuntimeAdapter>) {
        self.adapters.insert(adapter.kind().to_string(), adapter);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn RuntimeAdapter>> {
        self.adapters.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.adapters.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.adapters.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Runtimes whose CLI is installed on this machine
    pub async fn available(&self) -> Vec<String> {
        let mut available = Vec::new();
        for (kind, adapter) in &self.adapters {
            if adapter.is_available().await {
                available.push(kind.clone());
            }
        }
        available.sort();
        available
    }
}

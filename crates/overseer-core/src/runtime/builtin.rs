//! Builtin runtime adapters
//!
//! - Claude Code (`claude`), stream-json output
//! - Codex (`codex exec --json`)
//! - Gemini CLI (`gemini -p`), plain text
//! - Shell, for plain command agents and local testing

use super::adapter::{ExecuteOptions, ParsedLine, RuntimeAdapter, SpawnConfig};
use super::process::{run_one_shot, OneShotCommand};
use crate::types::{AgentProfile, CommandOutcome, TaskStepKind};
use async_trait::async_trait;
use serde_json::Value;

async fn on_path(program: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(program)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn one_shot(profile: &AgentProfile, program: &str, args: Vec<String>) -> OneShotCommand {
    OneShotCommand {
        program: program.to_string(),
        args,
        env: profile.env.clone(),
        cwd: profile.cwd.clone(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

// ============================================================================
// Claude Code
// ============================================================================

pub struct ClaudeCodeRuntime {
    program: String,
}

impl ClaudeCodeRuntime {
    pub fn new() -> Self {
        Self {
            program: std::env::var("OVERSEER_CLAUDE_PATH").unwrap_or_else(|_| "claude".to_string()),
        }
    }

    fn base_args(&self, profile: &AgentProfile) -> Vec<String> {
        let mut args = Vec::new();
        if profile.allow_full_access {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(model) = &profile.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(profile.extra_args.iter().cloned());
        args
    }

    fn parse_stream_line(line: &str) -> Option<ParsedLine> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        match value.get("type").and_then(Value::as_str)? {
            "system" => value
                .get("session_id")
                .and_then(Value::as_str)
                .map(|id| ParsedLine::SessionStarted(id.to_string())),
            "assistant" => {
                let content = value.pointer("/message/content")?.as_array()?;
                content.iter().find_map(|block| {
                    match block.get("type").and_then(Value::as_str)? {
                        "tool_use" => {
                            let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                            Some(ParsedLine::Progress(TaskStepKind::ToolUse, name.to_string()))
                        }
                        "thinking" => Some(ParsedLine::Progress(
                            TaskStepKind::Thinking,
                            truncate(block.get("thinking").and_then(Value::as_str).unwrap_or(""), 120),
                        )),
                        "text" => Some(ParsedLine::Progress(
                            TaskStepKind::Output,
                            truncate(block.get("text").and_then(Value::as_str).unwrap_or(""), 120),
                        )),
                        _ => None,
                    }
                })
            }
            "result" => Some(ParsedLine::Final {
                text: value
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                session_id: value
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            }),
            _ => None,
        }
    }
}

impl Default for ClaudeCodeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for ClaudeCodeRuntime {
    fn kind(&self) -> &str {
        "claude-code"
    }

    fn display_name(&self) -> &str {
        "Claude Code"
    }

    fn build_spawn_config(&self, profile: &AgentProfile) -> SpawnConfig {
        SpawnConfig::new(&self.program)
            .with_args(self.base_args(profile))
            .with_env("TERM", "xterm-256color")
    }

    fn parse_output(&self, line: &str) -> Option<ParsedLine> {
        Self::parse_stream_line(line)
    }

    async fn execute(
        &self,
        profile: &AgentProfile,
        text: &str,
        options: ExecuteOptions,
    ) -> CommandOutcome {
        let mut args = vec![
            "-p".to_string(),
            text.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(session_id) = &options.session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        args.extend(self.base_args(profile));

        run_one_shot(one_shot(profile, &self.program, args), &options, |line| {
            self.parse_output(line)
        })
        .await
    }

    async fn is_available(&self) -> bool {
        on_path(&self.program).await
    }
}

// ============================================================================
// Codex
// ============================================================================

pub struct CodexRuntime {
    program: String,
}

impl CodexRuntime {
    pub fn new() -> Self {
        Self {
            program: std::env::var("OVERSEER_CODEX_PATH").unwrap_or_else(|_| "codex".to_string()),
        }
    }

    fn base_args(profile: &AgentProfile) -> Vec<String> {
        let mut args = Vec::new();
        if profile.allow_full_access {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
        if let Some(model) = &profile.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(profile.extra_args.iter().cloned());
        args
    }
}

impl Default for CodexRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for CodexRuntime {
    fn kind(&self) -> &str {
        "codex"
    }

    fn display_name(&self) -> &str {
        "Codex"
    }

    fn build_spawn_config(&self, profile: &AgentProfile) -> SpawnConfig {
        SpawnConfig::new(&self.program).with_args(Self::base_args(profile))
    }

    fn parse_output(&self, line: &str) -> Option<ParsedLine> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        match value.get("type").and_then(Value::as_str)? {
            "thread.started" => value
                .get("thread_id")
                .and_then(Value::as_str)
                .map(|id| ParsedLine::SessionStarted(id.to_string())),
            "item.completed" => {
                let item = value.get("item")?;
                match item.get("type").and_then(Value::as_str)? {
                    "agent_message" => item
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|t| ParsedLine::Text(t.to_string())),
                    "command_execution" => Some(ParsedLine::Progress(
                        TaskStepKind::ToolUse,
                        truncate(item.get("command").and_then(Value::as_str).unwrap_or("command"), 120),
                    )),
                    "reasoning" => Some(ParsedLine::Progress(
                        TaskStepKind::Thinking,
                        truncate(item.get("text").and_then(Value::as_str).unwrap_or(""), 120),
                    )),
                    _ => None,
                }
            }
            "error" | "turn.failed" => Some(ParsedLine::Final {
                text: value
                    .get("message")
                    .or_else(|| value.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex turn failed")
                    .to_string(),
                session_id: None,
                is_error: true,
            }),
            _ => None,
        }
    }

    async fn execute(
        &self,
        profile: &AgentProfile,
        text: &str,
        options: ExecuteOptions,
    ) -> CommandOutcome {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        args.extend(Self::base_args(profile));
        args.push(text.to_string());

        run_one_shot(one_shot(profile, &self.program, args), &options, |line| {
            self.parse_output(line)
        })
        .await
    }

    async fn is_available(&self) -> bool {
        on_path(&self.program).await
    }
}

// ============================================================================
// Gemini CLI
// ============================================================================

pub struct GeminiRuntime {
    program: String,
}

impl GeminiRuntime {
    pub fn new() -> Self {
        Self {
            program: std::env::var("OVERSEER_GEMINI_PATH").unwrap_or_else(|_| "gemini".to_string()),
        }
    }

    fn base_args(profile: &AgentProfile) -> Vec<String> {
        let mut args = Vec::new();
        if profile.allow_full_access {
            args.push("--yolo".to_string());
        }
        if let Some(model) = &profile.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(profile.extra_args.iter().cloned());
        args
    }
}

impl Default for GeminiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for GeminiRuntime {
    fn kind(&self) -> &str {
        "gemini"
    }

    fn display_name(&self) -> &str {
        "Gemini CLI"
    }

    fn build_spawn_config(&self, profile: &AgentProfile) -> SpawnConfig {
        SpawnConfig::new(&self.program)
            .with_args(Self::base_args(profile))
            .with_env("SURFACE", "overseer")
    }

    async fn execute(
        &self,
        profile: &AgentProfile,
        text: &str,
        options: ExecuteOptions,
    ) -> CommandOutcome {
        let mut args = vec!["-p".to_string(), text.to_string()];
        args.extend(Self::base_args(profile));

        run_one_shot(one_shot(profile, &self.program, args), &options, |line| {
            self.parse_output(line)
        })
        .await
    }

    async fn is_available(&self) -> bool {
        on_path(&self.program).await
    }
}

// ============================================================================
// Shell
// ============================================================================

/// Runs each command through `sh -c`; the interactive session is a shell
pub struct ShellRuntime {
    shell: String,
}

impl ShellRuntime {
    pub fn new() -> Self {
        Self::with_shell("/bin/sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for ShellRuntime {
    fn kind(&self) -> &str {
        "shell"
    }

    fn display_name(&self) -> &str {
        "Shell"
    }

    fn build_spawn_config(&self, profile: &AgentProfile) -> SpawnConfig {
        SpawnConfig::new(&self.shell).with_args(profile.extra_args.clone())
    }

    fn format_input(&self, text: &str) -> String {
        format!("{}\n", text)
    }

    async fn execute(
        &self,
        profile: &AgentProfile,
        text: &str,
        options: ExecuteOptions,
    ) -> CommandOutcome {
        let args = vec!["-c".to_string(), text.to_string()];
        run_one_shot(one_shot(profile, &self.shell, args), &options, |line| {
            self.parse_output(line)
        })
        .await
    }

    async fn is_available(&self) -> bool {
        std::path::Path::new(&self.shell).exists()
    }
}

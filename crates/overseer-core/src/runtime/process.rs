//! One-shot CLI execution shared by the builtin runtimes

use super::adapter::{ExecuteOptions, ParsedLine};
use crate::types::{CommandOutcome, TaskStepKind};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct OneShotCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
}

/// Run `cmd` to completion, streaming stdout through `parse`
///
/// Cancellation kills the child and reports a failed outcome immediately.
pub async fn run_one_shot<P>(cmd: OneShotCommand, options: &ExecuteOptions, parse: P) -> CommandOutcome
where
    P: Fn(&str) -> Option<ParsedLine>,
{
    debug!("One-shot: {} {:?} (cwd: {:?})", cmd.program, cmd.args, cmd.cwd);

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .envs(&cmd.env)
        .current_dir(&cmd.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutcome::failed(format!("Failed to start {}: {}", cmd.program, e)),
    };

    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(stderr_tail(stderr)));
    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => return CommandOutcome::failed("Failed to capture stdout"),
    };

    let mut lines = BufReader::new(stdout).lines();
    let mut collected: Vec<String> = Vec::new();
    let mut session_id = options.session_id.clone();
    let mut final_result: Option<(String, bool)> = None;

    loop {
        tokio::select! {
            _ = options.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill cancelled {}: {}", cmd.program, e);
                }
                return CommandOutcome::failed("Cancelled");
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse(&line) {
                    Some(ParsedLine::Text(text)) => {
                        options.output(&text);
                        collected.push(text);
                    }
                    Some(ParsedLine::Progress(kind, summary)) => options.progress(kind, summary),
                    Some(ParsedLine::SessionStarted(id)) => session_id = Some(id),
                    Some(ParsedLine::Final { text, session_id: id, is_error }) => {
                        if id.is_some() {
                            session_id = id;
                        }
                        final_result = Some((text, is_error));
                    }
                    None => {}
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading {} stdout: {}", cmd.program, e);
                    break;
                }
            }
        }
    }

    let status = tokio::select! {
        _ = options.cancel.cancelled() => {
            let _ = child.kill().await;
            return CommandOutcome::failed("Cancelled");
        }
        status = child.wait() => status,
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if let Some((text, is_error)) = final_result {
        if is_error {
            options.progress(TaskStepKind::Error, text.clone());
            return CommandOutcome {
                success: false,
                text: String::new(),
                session_id,
                error: Some(text),
            };
        }
        return CommandOutcome::ok(text, session_id);
    }

    match status {
        Ok(status) if status.success() => CommandOutcome::ok(collected.join("\n"), session_id),
        Ok(status) => {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = if stderr.is_empty() {
                collected.join("\n")
            } else {
                stderr
            };
            CommandOutcome::failed(format!("{} exited with {}: {}", cmd.program, code, detail.trim()))
        }
        Err(e) => CommandOutcome::failed(format!("Failed to wait on {}: {}", cmd.program, e)),
    }
}

/// Drain stderr so the child never blocks on a full pipe; keep the tail
async fn stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

//! Runtime adapters
//!
//! This module handles:
//! - The capability interface each CLI runtime implements
//! - The registry keyed by runtime kind
//! - One-shot execution of a command turn
//! - Builtin runtimes (Claude Code, Codex, Gemini, Shell)

mod adapter;
mod builtin;
mod process;

pub use adapter::{
    ExecuteOptions, OutputFn, ParsedLine, ProgressFn, RuntimeAdapter, RuntimeRegistry, SpawnConfig,
};
pub use builtin::{ClaudeCodeRuntime, CodexRuntime, GeminiRuntime, ShellRuntime};
pub use process::{run_one_shot, OneShotCommand};

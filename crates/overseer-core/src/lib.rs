//! Overseer Core Library
//!
//! This crate provides the process-supervision backbone for a fleet of
//! CLI coding agents:
//! - Agent lifecycle and per-agent serialized command queues
//! - PTY I/O multiplexing with scrollback and batched output
//! - Discovery and health monitoring of services agents start
//! - SQLite-based persistence of profiles and conversation history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     overseer-core                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  supervisor/   - Agent lifecycle, command queue, detached   │
//! │  pty/          - PTY sessions, DSR replies, scrollback      │
//! │  services/     - Registration scan, probes, stop/restart    │
//! │  runtime/      - Runtime adapters and registry              │
//! │  storage/      - SQLite database, queries                   │
//! │  types/        - Shared type definitions                    │
//! │  collaborators - Store / secret / context interfaces        │
//! │  events.rs     - Typed event bus                            │
//! │  error.rs      - Error types                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod pty;
pub mod redact;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod supervisor;
pub mod timer;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;

pub use collaborators::{
    ContextBuilder, ConversationStore, EnvSecretResolver, PassthroughContext, ProfileStore,
    SecretResolver, SecretValuesProvider, StaticSecrets,
};
pub use config::{OverseerConfig, ServiceMonitorConfig, SupervisorConfig};
pub use events::EventBus;
pub use pty::PtyManager;
pub use redact::SecretRedactor;
pub use runtime::{ExecuteOptions, RuntimeAdapter, RuntimeRegistry, SpawnConfig};
pub use services::{
    ContainerBackend, NativeBackend, PortProbe, ServiceBackend, ServiceMonitor, TcpPortProbe,
};
pub use storage::Storage;
pub use supervisor::{AgentSupervisor, DetachedCommand, EnqueuedCommand, SupervisorDeps};
pub use timer::PeriodicTask;

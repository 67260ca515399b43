//! Core type definitions for Overseer
//!
//! Shared types used across the supervisor, the PTY layer and the service
//! monitor: agent profiles and state, command and task records, service
//! registrations, conversation entries and domain events.

mod agent_types;
mod conversation_types;
mod event_types;
mod service_types;
mod task_types;

pub use agent_types::*;
pub use conversation_types::*;
pub use event_types::*;
pub use service_types::*;
pub use task_types::*;

//! Service health monitor
//!
//! This module handles:
//! - Discovery of `.services.json` registration files in agent workspaces
//! - Port-based liveness probing with failure hysteresis
//! - Stop/restart through a pluggable execution backend

mod backend;
mod health;
mod monitor;
mod probe;
mod registration;
mod scanner;

pub use backend::{ContainerBackend, NativeBackend, ServiceBackend};
pub use health::HealthRecord;
pub use monitor::ServiceMonitor;
pub use probe::{PortProbe, TcpPortProbe};
pub use registration::{append_registration, dedupe, parse_registrations};
pub use scanner::{find_registration_files, scan_workspace};

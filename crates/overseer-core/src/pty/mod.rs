//! PTY I/O multiplexer
//!
//! This module handles:
//! - One pseudo-terminal per running agent
//! - Cursor-position query interception (`dsr`)
//! - Bounded scrollback for replay and crash diagnostics
//! - Batched, rate-limited output delivery

mod batcher;
mod dsr;
mod manager;
mod scrollback;
mod session;

pub use batcher::{FlushSink, OutputBatcher};
pub use dsr::{intercept_dsr, DsrScan, CURSOR_POSITION_REPLY};
pub use manager::PtyManager;
pub use scrollback::Scrollback;
pub use session::{ExitCallback, PtyDataHandler, PtyExit, PtySession, PtySpawnRequest, PtyWriter};

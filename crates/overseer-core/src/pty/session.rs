//! One pseudo-terminal per running agent

use super::batcher::{FlushSink, OutputBatcher};
use super::dsr::{intercept_dsr, CURSOR_POSITION_REPLY};
use super::scrollback::Scrollback;
use crate::error::{AgentError, Error, Result};
use nix::sys::signal;
use nix::unistd::Pid;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared handle to the PTY master's write side
pub type PtyWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Notified once when the child process exits on its own
pub type ExitCallback = Arc<dyn Fn(PtyExit) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyExit {
    pub agent_id: String,
    pub exit_code: Option<u32>,
    pub success: bool,
}

/// Everything needed to launch a process in a PTY
#[derive(Debug, Clone)]
pub struct PtySpawnRequest {
    pub agent_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

/// Per-chunk processing for one agent's output stream
///
/// Runs on the reader thread. Queries are answered before the cleaned text
/// reaches the scrollback or the batcher.
pub struct PtyDataHandler {
    agent_id: String,
    writer: PtyWriter,
    scrollback: Arc<Mutex<Scrollback>>,
    batcher: Arc<OutputBatcher>,
    /// Bytes of a UTF-8 sequence split across reads
    carry: Vec<u8>,
}

impl PtyDataHandler {
    pub fn new(
        agent_id: impl Into<String>,
        writer: PtyWriter,
        scrollback: Arc<Mutex<Scrollback>>,
        batcher: Arc<OutputBatcher>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            writer,
            scrollback,
            batcher,
            carry: Vec::new(),
        }
    }

    pub fn handle(&mut self, bytes: &[u8]) {
        let text = self.decode(bytes);
        if text.is_empty() {
            return;
        }

        let scan = intercept_dsr(&text);
        if scan.queries > 0 {
            self.answer_queries(scan.queries);
        }

        if scan.cleaned.is_empty() {
            return;
        }
        self.scrollback.lock().push(&scan.cleaned);
        self.batcher.push(&scan.cleaned);
    }

    fn answer_queries(&self, count: usize) {
        let mut writer = self.writer.lock();
        for _ in 0..count {
            if let Err(e) = writer.write_all(CURSOR_POSITION_REPLY) {
                warn!(agent_id = %self.agent_id, "Failed to answer cursor query: {}", e);
                return;
            }
        }
        if let Err(e) = writer.flush() {
            warn!(agent_id = %self.agent_id, "Failed to flush cursor reply: {}", e);
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        match std::str::from_utf8(&buf) {
            Ok(s) => s.to_string(),
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end: keep it for the next read
                let valid = e.valid_up_to();
                self.carry = buf[valid..].to_vec();
                String::from_utf8_lossy(&buf[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&buf).into_owned(),
        }
    }
}

/// A live (or exited) agent process attached to a PTY
pub struct PtySession {
    agent_id: String,
    pid: Option<u32>,
    writer: PtyWriter,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    scrollback: Arc<Mutex<Scrollback>>,
    batcher: Arc<OutputBatcher>,
    alive: Arc<AtomicBool>,
}

impl PtySession {
    /// Spawn the process; must be called from within a tokio runtime
    pub fn spawn(
        request: PtySpawnRequest,
        scrollback: Arc<Mutex<Scrollback>>,
        flush_interval: Duration,
        sink: FlushSink,
        on_exit: ExitCallback,
    ) -> Result<Arc<Self>> {
        let agent_id = request.agent_id.clone();
        debug!(
            agent_id = %agent_id,
            "Spawning PTY: {} {:?} (cwd: {:?})",
            request.command, request.args, request.cwd
        );

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Internal(format!("openpty failed: {}", e)))?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", request.command, e)))?;
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Internal(format!("Failed to clone PTY reader: {}", e)))?;
        let writer: PtyWriter = Arc::new(Mutex::new(
            pair.master
                .take_writer()
                .map_err(|e| Error::Internal(format!("Failed to take PTY writer: {}", e)))?,
        ));

        let batcher = Arc::new(OutputBatcher::new(flush_interval, sink));
        let alive = Arc::new(AtomicBool::new(true));

        let handler = PtyDataHandler::new(
            agent_id.clone(),
            Arc::clone(&writer),
            Arc::clone(&scrollback),
            Arc::clone(&batcher),
        );
        tokio::task::spawn_blocking(move || read_loop(reader, handler));

        // Exit watcher
        {
            let agent_id = agent_id.clone();
            let alive = Arc::clone(&alive);
            let batcher = Arc::clone(&batcher);
            tokio::task::spawn_blocking(move || {
                let (exit_code, success) = match child.wait() {
                    Ok(status) => (Some(status.exit_code()), status.success()),
                    Err(e) => {
                        error!(agent_id = %agent_id, "Failed to wait on PTY child: {}", e);
                        (None, false)
                    }
                };
                // A kill() already flipped the flag; only natural exits are reported
                if alive.swap(false, Ordering::SeqCst) {
                    batcher.flush();
                    info!(agent_id = %agent_id, ?exit_code, "PTY process exited");
                    on_exit(PtyExit {
                        agent_id,
                        exit_code,
                        success,
                    });
                }
            });
        }

        info!(agent_id = %agent_id, ?pid, "PTY started");

        Ok(Arc::new(Self {
            agent_id,
            pid,
            writer,
            killer: Mutex::new(killer),
            master: Mutex::new(pair.master),
            scrollback,
            batcher,
            alive,
        }))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Alive flag plus a signal-0 probe of the process
    pub fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        match self.pid {
            Some(pid) => signal::kill(Pid::from_raw(pid as i32), None).is_ok(),
            None => true,
        }
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::Agent(AgentError::NotRunning(self.agent_id.clone())));
        }
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Internal(format!("PTY resize failed: {}", e)))
    }

    /// Flush pending output, then terminate the process. Idempotent.
    pub fn kill(&self) {
        self.batcher.shutdown();
        if self.alive.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.killer.lock().kill() {
                debug!(agent_id = %self.agent_id, "PTY kill: {}", e);
            }
            info!(agent_id = %self.agent_id, "PTY killed");
        }
    }

    pub fn scrollback(&self) -> Arc<Mutex<Scrollback>> {
        Arc::clone(&self.scrollback)
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, mut handler: PtyDataHandler) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => handler.handle(&buf[..n]),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
    debug!(agent_id = %handler.agent_id, "PTY reader ended");
}

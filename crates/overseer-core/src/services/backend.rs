//! Execution backends for stopping and respawning tracked services
//!
//! The monitor never touches processes directly. A native backend signals
//! host processes; a container backend runs the same operations through
//! `docker exec` and maps container ports to host ports.

use crate::error::{Result, ServiceError};
use crate::types::TrackedService;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Terminate whatever serves `service.port`
    async fn kill(&self, service: &TrackedService) -> Result<()>;

    /// Respawn `service.command` in `service.cwd`, detached
    async fn restart(&self, service: &TrackedService) -> Result<()>;

    /// Host port to probe for a declared port; `None` means probe it as-is
    async fn resolve_port(&self, port: u16) -> Option<u16>;
}

fn backend_err(msg: impl Into<String>) -> crate::error::Error {
    ServiceError::Backend(msg.into()).into()
}

fn log_path(service: &TrackedService, cwd: &Path) -> Option<PathBuf> {
    service.log_file.as_ref().map(|f| {
        let path = PathBuf::from(f);
        if path.is_absolute() {
            path
        } else {
            cwd.join(path)
        }
    })
}

// ============================================================================
// Native
// ============================================================================

/// Host processes, found via `lsof` and signalled with SIGTERM
#[derive(Debug, Clone, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }

    async fn listening_pids(port: u16) -> Result<Vec<i32>> {
        let output = tokio::process::Command::new("lsof")
            .args(["-t", "-sTCP:LISTEN"])
            .arg(format!("-iTCP:{}", port))
            .output()
            .await
            .map_err(|e| backend_err(format!("failed to exec lsof: {}", e)))?;

        // lsof exits 1 when nothing matches
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .collect())
    }

    #[cfg(unix)]
    fn terminate(pid: i32) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::{getpgid, getpgrp, Pid};

        let pid = Pid::from_raw(pid);
        // Take down the whole group unless it is ours
        let result = match getpgid(Some(pid)) {
            Ok(pgid) if pgid != getpgrp() && pgid.as_raw() > 1 => {
                debug!("SIGTERM to process group {}", pgid);
                signal::killpg(pgid, Signal::SIGTERM)
            }
            _ => signal::kill(pid, Signal::SIGTERM),
        };

        match result {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(backend_err(format!("failed to signal {}: {}", pid, e))),
        }
    }

    #[cfg(not(unix))]
    fn terminate(pid: i32) -> Result<()> {
        Err(backend_err(format!(
            "signalling pid {} is not supported on this platform",
            pid
        )))
    }
}

#[async_trait]
impl ServiceBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    async fn kill(&self, service: &TrackedService) -> Result<()> {
        let pids = Self::listening_pids(service.port).await?;
        if pids.is_empty() {
            debug!(port = service.port, "Nothing listening, nothing to stop");
            return Ok(());
        }
        for pid in pids {
            Self::terminate(pid)?;
        }
        info!(port = service.port, name = %service.name, "Stopped service");
        Ok(())
    }

    async fn restart(&self, service: &TrackedService) -> Result<()> {
        let (command, cwd) = match (&service.command, &service.cwd) {
            (Some(command), Some(cwd)) => (command, PathBuf::from(cwd)),
            _ => return Err(ServiceError::NoCommand(service.name.clone()).into()),
        };

        let (stdout, stderr) = match log_path(service, &cwd) {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                let err = file.try_clone()?;
                (Stdio::from(file), Stdio::from(err))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| backend_err(format!("failed to respawn {}: {}", service.name, e)))?;
        info!(name = %service.name, pid = ?child.id(), "Respawned service");

        let name = service.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(name = %name, "Service process exited: {}", status),
                Err(e) => warn!(name = %name, "Failed to wait on service process: {}", e),
            }
        });
        Ok(())
    }

    async fn resolve_port(&self, _port: u16) -> Option<u16> {
        None
    }
}

// ============================================================================
// Container
// ============================================================================

/// Services running inside a docker container
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    container: String,
}

impl ContainerBackend {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    async fn run_docker(args: &[&str]) -> std::result::Result<String, String> {
        let output = tokio::process::Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to exec docker: {}", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            ))
        }
    }
}

/// Host port from `docker port` output such as `0.0.0.0:49153` or `[::]:49153`
fn parse_port_mapping(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

#[async_trait]
impl ServiceBackend for ContainerBackend {
    fn name(&self) -> &str {
        "container"
    }

    async fn kill(&self, service: &TrackedService) -> Result<()> {
        let script = format!(
            "pids=$(lsof -t -sTCP:LISTEN -iTCP:{port} 2>/dev/null || fuser {port}/tcp 2>/dev/null); \
             [ -z \"$pids\" ] || kill $pids",
            port = service.port
        );
        Self::run_docker(&["exec", &self.container, "sh", "-c", &script])
            .await
            .map_err(backend_err)?;
        info!(container = %self.container, port = service.port, "Stopped service in container");
        Ok(())
    }

    async fn restart(&self, service: &TrackedService) -> Result<()> {
        let (command, cwd) = match (&service.command, &service.cwd) {
            (Some(command), Some(cwd)) => (command, cwd),
            _ => return Err(ServiceError::NoCommand(service.name.clone()).into()),
        };

        let script = match log_path(service, Path::new(cwd)) {
            Some(log) => format!("{} >> '{}' 2>&1", command, log.display()),
            None => format!("{} > /dev/null 2>&1", command),
        };
        Self::run_docker(&["exec", "-d", "-w", cwd, &self.container, "sh", "-c", &script])
            .await
            .map_err(backend_err)?;
        info!(container = %self.container, name = %service.name, "Respawned service in container");
        Ok(())
    }

    async fn resolve_port(&self, port: u16) -> Option<u16> {
        match Self::run_docker(&["port", &self.container, &port.to_string()]).await {
            Ok(out) => parse_port_mapping(&out),
            Err(e) => {
                debug!("No port mapping for {}: {}", port, e);
                None
            }
        }
    }
}

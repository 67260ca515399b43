//! Overseer daemon
//!
//! Headless host that wires the supervisor and the service monitor together,
//! starts auto-start agents and logs fleet events until interrupted.

use anyhow::Context;
use overseer_core::{
    AgentSupervisor, ContainerBackend, EventBus, FleetEvent, NativeBackend, OverseerConfig,
    PeriodicTask, RuntimeRegistry, ServiceBackend, ServiceMonitor, Storage, SupervisorDeps,
    TcpPortProbe,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often agent workspaces are rescanned for registration files
const RESCAN_INTERVAL: Duration = Duration::from_secs(30);

fn config_path() -> PathBuf {
    std::env::var_os("OVERSEER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("overseer")
                .join("config.json")
        })
}

fn data_dir() -> PathBuf {
    std::env::var_os("OVERSEER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("overseer")
        })
}

async fn log_events(mut rx: broadcast::Receiver<FleetEvent>) {
    loop {
        match rx.recv().await {
            Ok(FleetEvent::PtyOutput { .. }) | Ok(FleetEvent::CommandOutput { .. }) => {}
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(agent_id = %event.agent_id(), "{}", json),
                Err(e) => warn!("Unserializable event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Drop a deleted agent's services as soon as the supervisor lets go of it
async fn forget_deleted(mut rx: broadcast::Receiver<FleetEvent>, monitor: ServiceMonitor) {
    loop {
        match rx.recv().await {
            Ok(FleetEvent::AgentDeleted { agent_id }) => monitor.remove_agent(&agent_id).await,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Deletion listener lagged by {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn rescan(supervisor: AgentSupervisor, monitor: ServiceMonitor) -> PeriodicTask {
    PeriodicTask::spawn("service-rescan", RESCAN_INTERVAL, move || {
        let supervisor = supervisor.clone();
        let monitor = monitor.clone();
        async move {
            let workspaces: Vec<_> = supervisor
                .list()
                .into_iter()
                .map(|state| (state.profile.id.clone(), state.profile.cwd.clone()))
                .collect();
            monitor.scan_all(&workspaces).await;
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Overseer daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config_path();
    let config = OverseerConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    let storage = Storage::new_with_path(data_dir()).context("failed to open storage")?;
    let bus = EventBus::new();
    tokio::spawn(log_events(bus.subscribe()));

    let supervisor = AgentSupervisor::new(
        config.supervisor.clone(),
        bus.clone(),
        RuntimeRegistry::with_builtins(),
        SupervisorDeps::with_storage(storage),
    );
    supervisor.load_profiles().await?;
    debug!("Available runtimes: {:?}", supervisor.runtimes().available().await);

    let backend: Arc<dyn ServiceBackend> = match std::env::var("OVERSEER_CONTAINER") {
        Ok(container) if !container.is_empty() => Arc::new(ContainerBackend::new(container)),
        _ => Arc::new(NativeBackend::new()),
    };
    let monitor = ServiceMonitor::new(
        config.services.clone(),
        bus.clone(),
        Arc::new(TcpPortProbe::new(config.services.probe_timeout())),
        backend,
    );
    tokio::spawn(forget_deleted(bus.subscribe(), monitor.clone()));

    let started = supervisor.start_auto_agents().await;
    info!("Auto-started {} agent(s)", started);

    let workspaces: Vec<_> = supervisor
        .list()
        .into_iter()
        .map(|state| (state.profile.id.clone(), state.profile.cwd.clone()))
        .collect();
    monitor.scan_all(&workspaces).await;

    let background = [
        supervisor.spawn_agent_health_check(),
        monitor.spawn_sweep(),
        rescan(supervisor.clone(), monitor.clone()),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Interrupted, shutting down");

    for task in &background {
        task.stop();
    }
    supervisor.shutdown().await;
    Ok(())
}

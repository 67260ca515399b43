//! Service registry with periodic health sweeps

use super::backend::ServiceBackend;
use super::health::HealthRecord;
use super::probe::PortProbe;
use super::registration::{append_registration, dedupe};
use super::scanner::scan_workspace;
use crate::config::ServiceMonitorConfig;
use crate::error::{Error, Result, ServiceError};
use crate::events::EventBus;
use crate::timer::PeriodicTask;
use crate::types::{FleetEvent, TrackedService};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

type ServiceKey = (String, String);

fn key(service: &TrackedService) -> ServiceKey {
    (service.agent_id.clone(), service.name.clone())
}

/// Tracks services agents started and keeps their `alive` flag current
///
/// Scans, sweeps, stops and restarts for one agent are serialized by a
/// per-agent lock; different agents proceed in parallel. Names and ports are
/// unique across all agents: a newer registration evicts older ones.
#[derive(Clone)]
pub struct ServiceMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: ServiceMonitorConfig,
    bus: EventBus,
    probe: Arc<dyn PortProbe>,
    backend: Arc<dyn ServiceBackend>,
    services: RwLock<HashMap<String, Vec<TrackedService>>>,
    health: Mutex<HashMap<ServiceKey, HealthRecord>>,
    agent_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Agents removed for good; late scans for them are dropped
    retired: Mutex<HashSet<String>>,
}

impl ServiceMonitor {
    pub fn new(
        config: ServiceMonitorConfig,
        bus: EventBus,
        probe: Arc<dyn PortProbe>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        info!("Service monitor using {} backend", backend.name());
        Self {
            inner: Arc::new(MonitorInner {
                config,
                bus,
                probe,
                backend,
                services: RwLock::new(HashMap::new()),
                health: Mutex::new(HashMap::new()),
                agent_locks: Mutex::new(HashMap::new()),
                retired: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .agent_locks
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    /// Resolve and connect under one deadline; a stuck backend reads as down
    async fn probe(&self, port: u16) -> bool {
        let check = async {
            let port = self.inner.backend.resolve_port(port).await.unwrap_or(port);
            self.inner.probe.is_listening(port).await
        };
        match tokio::time::timeout(self.inner.config.probe_timeout(), check).await {
            Ok(up) => up,
            Err(_) => {
                debug!(port, "Port check timed out");
                false
            }
        }
    }

    /// Rescan one agent's workspace and replace its cached services
    pub async fn scan_agent(&self, agent_id: &str, cwd: &Path) -> Result<Vec<TrackedService>> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;
        if self.inner.retired.lock().contains(agent_id) {
            debug!(agent_id = %agent_id, "Skipping scan for removed agent");
            return Ok(Vec::new());
        }

        let root = cwd.to_path_buf();
        let config = self.inner.config.clone();
        let found = tokio::task::spawn_blocking(move || scan_workspace(&root, &config))
            .await
            .map_err(|e| Error::Internal(format!("Service scan task failed: {}", e)))?;

        let entries: Vec<TrackedService> = found
            .into_iter()
            .flat_map(|(path, regs)| {
                regs.into_iter().map(move |reg| {
                    TrackedService::from_registration(agent_id, reg, Some(path.clone()))
                })
            })
            .collect();
        let mut services = dedupe(entries);

        let probes = join_all(services.iter().map(|s| self.probe(s.port))).await;

        let previous: HashMap<String, bool> = self
            .list_for_agent(agent_id)
            .into_iter()
            .map(|s| (s.name, s.alive))
            .collect();
        let now = Instant::now();
        let threshold = self.inner.config.failure_threshold;
        let mut shrunk = Vec::new();
        {
            let mut health = self.inner.health.lock();
            for (service, probe_ok) in services.iter_mut().zip(probes) {
                let record = health.entry(key(service)).or_default();
                service.alive = match previous.get(&service.name) {
                    Some(&was_alive) => record.observe(was_alive, probe_ok, threshold, now),
                    None => {
                        if probe_ok {
                            record.reset();
                        }
                        probe_ok
                    }
                };
            }

            let mut cache = self.inner.services.write();
            let pool: Vec<TrackedService> = cache
                .iter()
                .filter(|(agent, _)| agent.as_str() != agent_id)
                .flat_map(|(_, list)| list.iter().cloned())
                .chain(services)
                .collect();
            let mut regrouped: HashMap<String, Vec<TrackedService>> = HashMap::new();
            for service in dedupe(pool) {
                regrouped.entry(service.agent_id.clone()).or_default().push(service);
            }

            for (agent, list) in cache.iter_mut() {
                if agent == agent_id {
                    continue;
                }
                let kept = regrouped.remove(agent).unwrap_or_default();
                if kept.len() != list.len() {
                    shrunk.push((agent.clone(), kept.len()));
                    *list = kept;
                }
            }
            services = regrouped.remove(agent_id).unwrap_or_default();
            cache.insert(agent_id.to_string(), services.clone());

            health.retain(|(agent, name), _| {
                cache
                    .get(agent)
                    .is_some_and(|list| list.iter().any(|s| &s.name == name))
            });
        }

        let count = services.len();
        debug!(agent_id = %agent_id, count, "Scanned services");

        for (other, count) in shrunk {
            info!(agent_id = %other, count, "Services superseded by {}", agent_id);
            self.inner.bus.emit(FleetEvent::ServicesUpdated { agent_id: other, count });
        }

        self.inner.bus.emit(FleetEvent::ServicesUpdated {
            agent_id: agent_id.to_string(),
            count,
        });
        Ok(services)
    }

    /// Scan several workspaces concurrently; failures are logged per agent
    pub async fn scan_all(&self, agents: &[(String, PathBuf)]) {
        join_all(agents.iter().map(|(agent_id, cwd)| async move {
            if let Err(e) = self.scan_agent(agent_id, cwd).await {
                warn!(agent_id = %agent_id, "Service scan failed: {}", e);
            }
        }))
        .await;
    }

    /// Every tracked service, grouped by agent
    pub fn list(&self) -> Vec<TrackedService> {
        let services = self.inner.services.read();
        let mut agents: Vec<_> = services.keys().collect();
        agents.sort();
        agents
            .into_iter()
            .flat_map(|agent| services[agent].iter().cloned())
            .collect()
    }

    pub fn list_for_agent(&self, agent_id: &str) -> Vec<TrackedService> {
        self.inner
            .services
            .read()
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a deleted agent's services; later scans for it are ignored
    pub async fn remove_agent(&self, agent_id: &str) {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        self.inner.retired.lock().insert(agent_id.to_string());
        self.inner.services.write().remove(agent_id);
        self.inner.health.lock().retain(|(agent, _), _| agent != agent_id);
        self.inner.agent_locks.lock().remove(agent_id);
        info!(agent_id = %agent_id, "Stopped tracking services");
    }

    fn find(&self, pred: impl Fn(&TrackedService) -> bool) -> Option<TrackedService> {
        let services = self.inner.services.read();
        let mut agents: Vec<_> = services.keys().collect();
        agents.sort();
        agents
            .into_iter()
            .find_map(|agent| services[agent].iter().find(|s| pred(s)).cloned())
    }

    fn update(&self, service: &TrackedService, f: impl FnOnce(&mut TrackedService)) -> Option<bool> {
        let mut services = self.inner.services.write();
        let entry = services
            .get_mut(&service.agent_id)?
            .iter_mut()
            .find(|s| s.name == service.name)?;
        let was_alive = entry.alive;
        f(entry);
        Some(was_alive)
    }

    fn emit_health(&self, service: &TrackedService, alive: bool) {
        self.inner.bus.emit(FleetEvent::ServiceHealthChanged {
            agent_id: service.agent_id.clone(),
            name: service.name.clone(),
            port: service.port,
            alive,
        });
    }

    /// Terminate the service on `port` and mark it dead right away
    pub async fn stop_service(&self, port: u16) -> Result<()> {
        let service = self
            .find(|s| s.port == port)
            .ok_or(ServiceError::PortNotFound(port))?;
        let lock = self.agent_lock(&service.agent_id);
        let _guard = lock.lock().await;

        self.inner.backend.kill(&service).await?;

        if let Some(record) = self.inner.health.lock().get_mut(&key(&service)) {
            record.reset();
        }
        if self.update(&service, |s| s.alive = false) == Some(true) {
            self.emit_health(&service, false);
        }
        info!(agent_id = %service.agent_id, port, name = %service.name, "Service stopped");
        Ok(())
    }

    /// Respawn a dead service from its recorded command
    pub async fn restart_service(&self, name: &str) -> Result<TrackedService> {
        let found = self
            .find(|s| s.name == name)
            .ok_or_else(|| ServiceError::NameNotFound(name.to_string()))?;
        let lock = self.agent_lock(&found.agent_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a sweep may have changed it
        let mut service = self
            .list_for_agent(&found.agent_id)
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ServiceError::NameNotFound(name.to_string()))?;

        if service.command.is_none() || service.cwd.is_none() {
            return Err(ServiceError::NoCommand(name.to_string()).into());
        }
        if service.alive {
            return Err(ServiceError::AlreadyAlive(name.to_string()).into());
        }

        self.inner.backend.restart(&service).await?;

        self.inner
            .health
            .lock()
            .entry(key(&service))
            .or_default()
            .arm_grace(Instant::now(), self.inner.config.grace_window());

        service.alive = true;
        service.started_at = chrono::Utc::now();
        let started_at = service.started_at;
        self.update(&service, |s| {
            s.alive = true;
            s.started_at = started_at;
        });
        self.emit_health(&service, true);

        self.record_restart(&service);
        info!(agent_id = %service.agent_id, name = %name, port = service.port, "Service restarted");
        Ok(service)
    }

    fn record_restart(&self, service: &TrackedService) {
        let Some(reg) = service.to_registration() else {
            return;
        };
        let path = match (&service.source_file, &service.cwd) {
            (Some(path), _) => path.clone(),
            (None, Some(cwd)) => Path::new(cwd).join(&self.inner.config.registration_file),
            (None, None) => return,
        };
        if let Err(e) = append_registration(&path, &reg) {
            warn!(name = %service.name, "Failed to record restart in {:?}: {}", path, e);
        }
    }

    /// Re-probe every cached service once
    pub async fn sweep(&self) {
        self.sweep_at(Instant::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: Instant) {
        let agents: Vec<String> = self.inner.services.read().keys().cloned().collect();
        join_all(agents.iter().map(|agent_id| self.sweep_agent(agent_id, now))).await;
    }

    async fn sweep_agent(&self, agent_id: &str, now: Instant) {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let services = self.list_for_agent(agent_id);
        if services.is_empty() {
            return;
        }
        let probes = join_all(services.iter().map(|s| self.probe(s.port))).await;
        let threshold = self.inner.config.failure_threshold;

        let mut changed = Vec::new();
        {
            let mut health = self.inner.health.lock();
            let mut cache = self.inner.services.write();
            let Some(cached) = cache.get_mut(agent_id) else {
                return;
            };
            for (service, probe_ok) in services.iter().zip(probes) {
                // Evicted by a newer registration while probing
                let Some(entry) = cached.iter_mut().find(|s| s.name == service.name) else {
                    continue;
                };
                let record = health.entry(key(service)).or_default();
                let alive = record.observe(entry.alive, probe_ok, threshold, now);
                if alive != entry.alive {
                    entry.alive = alive;
                    changed.push(entry.clone());
                }
            }
        }

        for service in changed {
            if service.alive {
                info!(agent_id = %agent_id, name = %service.name, port = service.port, "Service is back up");
            } else {
                warn!(agent_id = %agent_id, name = %service.name, port = service.port, "Service is down");
            }
            self.emit_health(&service, service.alive);
        }
    }

    /// Run `sweep` on the configured interval until the handle is stopped
    pub fn spawn_sweep(&self) -> PeriodicTask {
        let monitor = self.clone();
        PeriodicTask::spawn("service-sweep", self.inner.config.sweep_interval(), move || {
            let monitor = monitor.clone();
            async move { monitor.sweep().await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::MockServiceBackend;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Probe whose answers the test flips per port
    #[derive(Default)]
    struct ScriptedProbe {
        up: Mutex<HashSet<u16>>,
    }

    impl ScriptedProbe {
        fn set(&self, port: u16, up: bool) {
            if up {
                self.up.lock().insert(port);
            } else {
                self.up.lock().remove(&port);
            }
        }
    }

    #[async_trait::async_trait]
    impl PortProbe for ScriptedProbe {
        async fn is_listening(&self, port: u16) -> bool {
            self.up.lock().contains(&port)
        }
    }

    fn backend() -> MockServiceBackend {
        let mut backend = MockServiceBackend::new();
        backend.expect_name().return_const("mock".to_string());
        backend.expect_resolve_port().returning(|_| None);
        backend.expect_kill().returning(|_| Ok(()));
        backend.expect_restart().returning(|_| Ok(()));
        backend
    }

    fn setup() -> (ServiceMonitor, Arc<ScriptedProbe>, tempfile::TempDir) {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = ServiceMonitor::new(
            ServiceMonitorConfig::default(),
            EventBus::new(),
            probe.clone(),
            Arc::new(backend()),
        );
        (monitor, probe, tempfile::tempdir().unwrap())
    }

    fn write_services(dir: &Path, lines: &[(u16, &str, &str)]) {
        let content: String = lines
            .iter()
            .map(|(port, name, at)| {
                format!(
                    "{{\"port\":{},\"name\":\"{}\",\"command\":\"true\",\"cwd\":\"{}\",\"startedAt\":\"{}\"}}\n",
                    port,
                    name,
                    dir.display(),
                    at
                )
            })
            .collect();
        std::fs::write(dir.join(".services.json"), content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_dedupes_by_port() {
        let (monitor, probe, dir) = setup();
        probe.set(3000, true);
        write_services(
            dir.path(),
            &[
                (3000, "api", "2026-01-01T00:00:00Z"),
                (3001, "web", "2026-01-01T00:01:00Z"),
                (3000, "api-v2", "2026-01-01T00:02:00Z"),
            ],
        );

        monitor.scan_agent("a", dir.path()).await.unwrap();

        let listed: Vec<_> = monitor
            .list()
            .into_iter()
            .map(|s| (s.name, s.port, s.alive))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("web".to_string(), 3001, false),
                ("api-v2".to_string(), 3000, true)
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_threshold_and_reset() {
        let (monitor, probe, dir) = setup();
        probe.set(4000, true);
        write_services(dir.path(), &[(4000, "api", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();
        let mut events = monitor.inner.bus.subscribe();

        probe.set(4000, false);
        monitor.sweep().await;
        monitor.sweep().await;
        assert!(monitor.list_for_agent("a")[0].alive);

        probe.set(4000, true);
        monitor.sweep().await;
        probe.set(4000, false);
        monitor.sweep().await;
        monitor.sweep().await;
        assert!(monitor.list_for_agent("a")[0].alive);

        monitor.sweep().await;
        assert!(!monitor.list_for_agent("a")[0].alive);

        match events.try_recv().unwrap() {
            FleetEvent::ServiceHealthChanged { name, alive, .. } => {
                assert_eq!(name, "api");
                assert!(!alive);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restart_grace_window() {
        let (monitor, _probe, dir) = setup();
        write_services(dir.path(), &[(4100, "worker", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();
        assert!(!monitor.list_for_agent("a")[0].alive);

        let restarted = monitor.restart_service("worker").await.unwrap();
        assert!(restarted.alive);

        let start = Instant::now();
        for _ in 0..5 {
            monitor.sweep_at(start + Duration::from_secs(5)).await;
        }
        assert!(monitor.list_for_agent("a")[0].alive);

        let later = start + Duration::from_secs(11);
        monitor.sweep_at(later).await;
        monitor.sweep_at(later).await;
        assert!(monitor.list_for_agent("a")[0].alive);
        monitor.sweep_at(later).await;
        assert!(!monitor.list_for_agent("a")[0].alive);
    }

    #[tokio::test]
    async fn test_restart_appends_registration() {
        let (monitor, _probe, dir) = setup();
        write_services(dir.path(), &[(4200, "job", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();

        monitor.restart_service("job").await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(".services.json")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().last().unwrap().contains("\"name\":\"job\""));

        // A rescan stays consistent with the restart
        let services = monitor.scan_agent("a", dir.path()).await.unwrap();
        assert_eq!(services.len(), 1);
        assert!(services[0].alive);
    }

    #[tokio::test]
    async fn test_restart_rejections() {
        let (monitor, probe, dir) = setup();
        probe.set(4300, true);
        std::fs::write(
            dir.path().join(".services.json"),
            format!(
                "{{\"port\":4300,\"name\":\"up\",\"command\":\"true\",\"cwd\":\"{0}\",\"startedAt\":\"2026-01-01T00:00:00Z\"}}\n\
                 {{\"port\":4301,\"name\":\"bare\",\"command\":\"\",\"cwd\":\"{0}\",\"startedAt\":\"2026-01-01T00:00:00Z\"}}\n",
                dir.path().display()
            ),
        )
        .unwrap();
        monitor.scan_agent("a", dir.path()).await.unwrap();

        assert!(matches!(
            monitor.restart_service("up").await,
            Err(Error::Service(ServiceError::AlreadyAlive(_)))
        ));
        assert!(matches!(
            monitor.restart_service("bare").await,
            Err(Error::Service(ServiceError::NoCommand(_)))
        ));
        assert!(matches!(
            monitor.restart_service("ghost").await,
            Err(Error::Service(ServiceError::NameNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_stop_marks_dead_immediately() {
        let (monitor, probe, dir) = setup();
        probe.set(4400, true);
        write_services(dir.path(), &[(4400, "api", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();
        assert!(monitor.list_for_agent("a")[0].alive);

        monitor.stop_service(4400).await.unwrap();
        assert!(!monitor.list_for_agent("a")[0].alive);

        assert!(matches!(
            monitor.stop_service(9).await,
            Err(Error::Service(ServiceError::PortNotFound(9)))
        ));
    }

    #[tokio::test]
    async fn test_remove_agent() {
        let (monitor, _probe, dir) = setup();
        write_services(dir.path(), &[(4500, "api", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();
        monitor.remove_agent("a").await;
        assert!(monitor.list().is_empty());
    }

    #[tokio::test]
    async fn test_scan_after_remove_is_ignored() {
        let (monitor, _probe, dir) = setup();
        write_services(dir.path(), &[(4600, "api", "2026-01-01T00:00:00Z")]);
        monitor.scan_agent("a", dir.path()).await.unwrap();

        // A scan queued behind the removal must not bring the agent back
        let lock = monitor.agent_lock("a");
        let held = lock.lock().await;
        let removal = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.remove_agent("a").await })
        };
        tokio::task::yield_now().await;
        let late_scan = {
            let monitor = monitor.clone();
            let path = dir.path().to_path_buf();
            tokio::spawn(async move { monitor.scan_agent("a", &path).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        removal.await.unwrap();
        late_scan.await.unwrap().unwrap();
        assert!(monitor.list().is_empty());

        assert!(monitor.scan_agent("a", dir.path()).await.unwrap().is_empty());
        assert!(monitor.list().is_empty());
        assert!(monitor.inner.health.lock().is_empty());
    }

    #[tokio::test]
    async fn test_scan_dedupes_across_agents() {
        let (monitor, probe, dir_a) = setup();
        let dir_b = tempfile::tempdir().unwrap();
        probe.set(3000, true);
        write_services(dir_a.path(), &[(3000, "api", "2026-01-01T00:00:00Z")]);
        write_services(dir_b.path(), &[(3000, "api-v2", "2026-01-01T00:02:00Z")]);
        let mut events = monitor.inner.bus.subscribe();

        monitor
            .scan_all(&[
                ("a".to_string(), dir_a.path().to_path_buf()),
                ("b".to_string(), dir_b.path().to_path_buf()),
            ])
            .await;

        let listed: Vec<_> = monitor
            .list()
            .into_iter()
            .map(|s| (s.agent_id, s.name, s.port))
            .collect();
        assert_eq!(listed, vec![("b".to_string(), "api-v2".to_string(), 3000)]);
        assert!(monitor.list_for_agent("a").is_empty());

        let mut counts = HashMap::new();
        while let Ok(event) = events.try_recv() {
            if let FleetEvent::ServicesUpdated { agent_id, count } = event {
                counts.insert(agent_id, count);
            }
        }
        assert_eq!(counts.get("a"), Some(&0));
        assert_eq!(counts.get("b"), Some(&1));

        // Rescanning the older agent cannot win the port back
        monitor.scan_agent("a", dir_a.path()).await.unwrap();
        assert_eq!(monitor.list().len(), 1);
        assert_eq!(monitor.list()[0].agent_id, "b");

        monitor.stop_service(3000).await.unwrap();
        assert!(!monitor.list_for_agent("b")[0].alive);
        assert!(!monitor
            .inner
            .health
            .lock()
            .contains_key(&("a".to_string(), "api".to_string())));
    }

    /// Backend whose port lookup never answers
    struct StuckBackend;

    #[async_trait::async_trait]
    impl ServiceBackend for StuckBackend {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn kill(&self, _service: &TrackedService) -> Result<()> {
            Ok(())
        }

        async fn restart(&self, _service: &TrackedService) -> Result<()> {
            Ok(())
        }

        async fn resolve_port(&self, _port: u16) -> Option<u16> {
            std::future::pending::<()>().await;
            None
        }
    }

    #[tokio::test]
    async fn test_stuck_port_lookup_reads_as_down() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set(4700, true);
        let monitor = ServiceMonitor::new(
            ServiceMonitorConfig {
                probe_timeout_ms: 50,
                ..Default::default()
            },
            EventBus::new(),
            probe,
            Arc::new(StuckBackend),
        );
        let dir = tempfile::tempdir().unwrap();
        write_services(dir.path(), &[(4700, "db", "2026-01-01T00:00:00Z")]);

        let services = tokio::time::timeout(Duration::from_secs(5), monitor.scan_agent("a", dir.path()))
            .await
            .unwrap()
            .unwrap();
        assert!(!services[0].alive);

        tokio::time::timeout(Duration::from_secs(5), monitor.sweep())
            .await
            .unwrap();
        assert!(!monitor.list_for_agent("a")[0].alive);
    }
}

//! In-memory host shared by the integration tests.

#![allow(dead_code)]

use dns_redirect::adapter::IpFamily;
use dns_redirect::directory::{AdapterSource, InventoryEntry};
use dns_redirect::dns::{DnsCache, DnsStrategy};
use dns_redirect::ports::{SYSTEM_PID, TcpTable};
use dns_redirect::process::ProcessControl;
use dns_redirect::resolver::HitLogTracker;
use dns_redirect::service::{RunState, ServiceFault, ServiceManager, ServiceSpec, StartType};
use dns_redirect::{
    AdapterId, Error, Host, NetworkAdapter, OrchestratorConfig, ProxyOrchestrator, Result,
    RetryPolicy, SettingsStore,
};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const ETHERNET_ID: &str = "{AAAAAAAA-0000-0000-0000-000000000001}";
pub const WIFI_ID: &str = "{AAAAAAAA-0000-0000-0000-000000000002}";

/// One simulated adapter. An empty server list means automatic DNS.
#[derive(Debug, Clone)]
pub struct SimAdapter {
    pub friendly_name: String,
    pub guid: String,
    pub index: u32,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
}

impl SimAdapter {
    pub fn new(friendly_name: &str, guid: &str, index: u32, ipv4: &[&str], ipv6: &[&str]) -> Self {
        Self {
            friendly_name: friendly_name.into(),
            guid: guid.into(),
            index,
            ipv4: ipv4.iter().map(ToString::to_string).collect(),
            ipv6: ipv6.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimService {
    pub spec: Option<ServiceSpec>,
    pub running: bool,
    pub marked_for_delete: bool,
    /// Ports released when the service stops.
    pub bound_ports: Vec<u16>,
}

#[derive(Debug, Default)]
pub struct SimState {
    pub adapters: Vec<SimAdapter>,
    pub best_index: u32,
    pub processes: HashMap<u32, String>,
    pub next_pid: u32,
    pub spawned: Vec<PathBuf>,
    pub killed: Vec<u32>,
    pub services: HashMap<String, SimService>,
    pub ports: HashMap<u16, u32>,
    /// Processes that ignore kill requests.
    pub unkillable: HashSet<u32>,
    pub dns_writes: Vec<(String, IpFamily, Vec<String>)>,
    pub failing_strategies: HashSet<(IpFamily, &'static str)>,
    /// Adapters whose DNS cannot be written by any strategy.
    pub locked_adapters: HashSet<String>,
    pub flushes: usize,
    pub hit_log_started: Vec<PathBuf>,
    pub hit_log_stopped: Vec<PathBuf>,
}

/// Handle to the shared simulated OS.
#[derive(Clone, Default)]
pub struct Sim {
    state: Arc<Mutex<SimState>>,
}

impl Sim {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.state().next_pid = 1000;
        sim
    }

    /// Ethernet on static DNS and Wi-Fi on automatic DNS, Ethernet carrying
    /// the default route.
    pub fn two_adapters() -> Self {
        let sim = Self::new();
        {
            let mut s = sim.state();
            s.adapters.push(SimAdapter::new(
                "Ethernet",
                ETHERNET_ID,
                3,
                &["8.8.8.8", "1.1.1.1"],
                &["2001:4860:4860::8888"],
            ));
            s.adapters.push(SimAdapter::new("Wi-Fi", WIFI_ID, 7, &[], &[]));
            s.best_index = 3;
        }
        sim
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn adapter(&self, friendly_name: &str) -> SimAdapter {
        self.state()
            .adapters
            .iter()
            .find(|a| a.friendly_name == friendly_name)
            .cloned()
            .unwrap()
    }

    pub fn remove_adapter(&self, friendly_name: &str) {
        self.state().adapters.retain(|a| a.friendly_name != friendly_name);
    }

    pub fn set_best_index(&self, index: u32) {
        self.state().best_index = index;
    }

    /// Starts a foreign process listening on `port`.
    pub fn occupy_port(&self, port: u16, name: &str) -> u32 {
        let mut s = self.state();
        let pid = s.next_pid;
        s.next_pid += 1;
        s.processes.insert(pid, name.into());
        s.ports.insert(port, pid);
        pid
    }

    /// Registers a running service that owns `ports` under the system PID.
    pub fn system_listener(&self, service: &str, ports: &[u16]) {
        let mut s = self.state();
        for &port in ports {
            s.ports.insert(port, SYSTEM_PID);
        }
        s.services.insert(
            service.into(),
            SimService {
                running: true,
                bound_ports: ports.to_vec(),
                ..SimService::default()
            },
        );
    }

    pub fn install_service(&self, name: &str, running: bool) {
        self.state().services.insert(
            name.into(),
            SimService {
                running,
                ..SimService::default()
            },
        );
    }

    pub fn fail_strategy(&self, family: IpFamily, name: &'static str) {
        self.state().failing_strategies.insert((family, name));
    }

    pub fn lock_adapter_dns(&self, friendly_name: &str) {
        self.state().locked_adapters.insert(friendly_name.into());
    }

    pub fn unlock_adapter_dns(&self, friendly_name: &str) {
        self.state().locked_adapters.remove(friendly_name);
    }

    pub fn running_count(&self, name: &str) -> usize {
        self.state().processes.values().filter(|n| *n == name).count()
    }

    pub fn service_running(&self, name: &str) -> bool {
        self.state().services.get(name).is_some_and(|s| s.running)
    }

    pub fn host(&self) -> Host {
        let dns = |family, name| -> Arc<dyn DnsStrategy> {
            Arc::new(SimDns {
                sim: self.clone(),
                family,
                name,
            })
        };
        Host {
            adapters: Arc::new(self.clone()),
            ipv4_dns: vec![dns(IpFamily::V4, "primary"), dns(IpFamily::V4, "fallback")],
            ipv6_dns: vec![dns(IpFamily::V6, "primary"), dns(IpFamily::V6, "fallback")],
            dns_cache: Arc::new(self.clone()),
            tcp_table: Arc::new(self.clone()),
            processes: Arc::new(self.clone()),
            services: Arc::new(self.clone()),
            hit_log: Host::noop_tracker(),
        }
        .with_hit_log_tracker(Arc::new(SimTracker(self.clone())))
    }
}

/// An orchestrator over `sim` with its installation under `base` and every
/// wait collapsed to a single check.
pub fn orchestrator(sim: &Sim, base: &Path) -> ProxyOrchestrator {
    let config = OrchestratorConfig::for_base_dir(base).with_waits(RetryPolicy::immediate());
    let settings = SettingsStore::load(&config.settings_path);
    ProxyOrchestrator::new(sim.host(), config, settings)
}

/// The settings as they are on disk.
pub fn settings_on_disk(orchestrator: &ProxyOrchestrator) -> dns_redirect::PersistedSettings {
    SettingsStore::load(orchestrator.settings().path()).snapshot()
}

pub fn find(adapters: &[NetworkAdapter], friendly_name: &str) -> NetworkAdapter {
    adapters
        .iter()
        .find(|a| a.friendly_name == friendly_name)
        .cloned()
        .unwrap()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl AdapterSource for Sim {
    fn inventory(&self) -> Result<Vec<InventoryEntry>> {
        Ok(self
            .state()
            .adapters
            .iter()
            .map(|a| InventoryEntry {
                name: a.friendly_name.to_lowercase(),
                friendly_name: a.friendly_name.clone(),
                description: format!("{} adapter", a.friendly_name),
                interface_index: a.index,
                guid: a.guid.clone(),
                enabled: true,
                connection_status: 2,
                physical: true,
                ipv4_dns: Some(a.ipv4.clone()),
            })
            .collect())
    }

    fn ipv6_dns(&self) -> Result<HashMap<AdapterId, Vec<String>>> {
        Ok(self
            .state()
            .adapters
            .iter()
            .map(|a| (a.guid.parse().unwrap(), a.ipv6.clone()))
            .collect())
    }

    fn dns_auto(&self, family: IpFamily) -> Result<HashMap<AdapterId, bool>> {
        Ok(self
            .state()
            .adapters
            .iter()
            .map(|a| {
                let servers = match family {
                    IpFamily::V4 => &a.ipv4,
                    IpFamily::V6 => &a.ipv6,
                };
                (a.guid.parse().unwrap(), servers.is_empty())
            })
            .collect())
    }

    fn best_interface_index(&self) -> Result<u32> {
        Ok(self.state().best_index)
    }
}

struct SimDns {
    sim: Sim,
    family: IpFamily,
    name: &'static str,
}

impl DnsStrategy for SimDns {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply<'a>(&'a self, adapter: &'a NetworkAdapter, servers: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut s = self.sim.state();
            if s.failing_strategies.contains(&(self.family, self.name))
                || s.locked_adapters.contains(&adapter.friendly_name)
            {
                return Err(Error::Command {
                    command: self.name.into(),
                    stderr: "simulated failure".into(),
                });
            }
            let id = adapter.id.to_string();
            let Some(target) = s.adapters.iter_mut().find(|a| a.guid == id) else {
                return Err(Error::AdapterNotFound {
                    name: adapter.friendly_name.clone(),
                });
            };
            match self.family {
                IpFamily::V4 => target.ipv4 = servers.to_vec(),
                IpFamily::V6 => target.ipv6 = servers.to_vec(),
            }
            s.dns_writes
                .push((adapter.friendly_name.clone(), self.family, servers.to_vec()));
            Ok(())
        })
    }
}

impl DnsCache for Sim {
    fn flush(&self) -> Result<()> {
        self.state().flushes += 1;
        Ok(())
    }
}

impl TcpTable for Sim {
    fn owner_pid(&self, port: u16, family: IpFamily) -> Result<u32> {
        Ok(match family {
            IpFamily::V4 => self.state().ports.get(&port).copied().unwrap_or(0),
            IpFamily::V6 => 0,
        })
    }
}

impl ProcessControl for Sim {
    fn count(&self, name: &str) -> usize {
        self.running_count(name)
    }

    fn spawn(&self, program: &Path, _working_dir: &Path) -> Result<u32> {
        let mut s = self.state();
        let pid = s.next_pid;
        s.next_pid += 1;
        s.processes.insert(pid, file_stem(program));
        s.spawned.push(program.to_path_buf());
        Ok(pid)
    }

    fn kill_by_name(&self, name: &str) -> Result<usize> {
        let pids: Vec<u32> = self
            .state()
            .processes
            .iter()
            .filter(|(_, n)| *n == name)
            .map(|(pid, _)| *pid)
            .collect();
        for &pid in &pids {
            self.kill(pid)?;
        }
        Ok(pids.len())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let mut s = self.state();
        if s.unkillable.contains(&pid) {
            return Err(Error::Process {
                name: pid.to_string(),
                reason: "access denied".into(),
            });
        }
        if s.processes.remove(&pid).is_none() {
            return Err(Error::Process {
                name: pid.to_string(),
                reason: "no such process".into(),
            });
        }
        s.ports.retain(|_, owner| *owner != pid);
        s.killed.push(pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state().processes.contains_key(&pid)
    }
}

impl ServiceManager for Sim {
    fn open(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        match self.state().services.get(name) {
            None => Err(ServiceFault::DoesNotExist),
            Some(s) if s.marked_for_delete => Err(ServiceFault::MarkedForDelete),
            Some(_) => Ok(()),
        }
    }

    fn create(&self, spec: &ServiceSpec) -> std::result::Result<(), ServiceFault> {
        let mut s = self.state();
        if s.services.contains_key(&spec.name) {
            return Err(ServiceFault::Os(1073));
        }
        s.services.insert(
            spec.name.clone(),
            SimService {
                spec: Some(spec.clone()),
                ..SimService::default()
            },
        );
        Ok(())
    }

    fn start(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        self.open(name)?;
        let mut s = self.state();
        let service = s.services.get_mut(name).ok_or(ServiceFault::DoesNotExist)?;
        if service.running {
            return Err(ServiceFault::AlreadyRunning);
        }
        service.running = true;
        Ok(())
    }

    fn stop(&self, name: &str) -> std::result::Result<RunState, ServiceFault> {
        let mut s = self.state();
        let service = s.services.get_mut(name).ok_or(ServiceFault::DoesNotExist)?;
        if !service.running {
            return Err(ServiceFault::NotActive);
        }
        service.running = false;
        let released = std::mem::take(&mut service.bound_ports);
        for port in released {
            s.ports.remove(&port);
        }
        Ok(RunState::Stopped)
    }

    fn query(&self, name: &str) -> std::result::Result<RunState, ServiceFault> {
        self.open(name)?;
        let running = self.service_running(name);
        Ok(if running { RunState::Running } else { RunState::Stopped })
    }

    fn delete(&self, name: &str) -> std::result::Result<(), ServiceFault> {
        self.state()
            .services
            .remove(name)
            .map(|_| ())
            .ok_or(ServiceFault::DoesNotExist)
    }

    fn set_start_mode(&self, name: &str, mode: StartType) -> std::result::Result<(), ServiceFault> {
        let mut s = self.state();
        let service = s.services.get_mut(name).ok_or(ServiceFault::DoesNotExist)?;
        if let Some(spec) = service.spec.as_mut() {
            spec.start_type = mode;
        }
        Ok(())
    }
}

struct SimTracker(Sim);

impl HitLogTracker for SimTracker {
    fn start(&self, path: &Path) {
        self.0.state().hit_log_started.push(path.to_path_buf());
    }

    fn stop(&self, path: &Path) {
        self.0.state().hit_log_stopped.push(path.to_path_buf());
    }
}

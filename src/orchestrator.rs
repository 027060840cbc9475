//! The start/stop state machine.
//!
//! [`ProxyOrchestrator`] is the only component that changes adapter DNS. Its
//! composite operations share one single-flight lock: a call made while
//! another is in flight returns [`Outcome::Busy`] at once instead of queueing.
//!
//! Start is all-or-nothing in the forward direction: the first failing step
//! aborts the rest and nothing is rolled back. Stop is the opposite: every
//! step runs regardless of earlier failures, because it is also the
//! emergency and uninstall path.

use crate::adapter::{AdapterScope, NetworkAdapter};
use crate::config::OrchestratorConfig;
use crate::directory::AdapterDirectory;
use crate::dns::DnsConfigurator;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::ports::{PortConflict, PortReclaimer};
use crate::process::ProxyProcess;
use crate::resolver::ResolverService;
use crate::service::ServiceSupervisor;
use crate::settings::{AdapterDnsBackup, SettingsStore};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, PoisonError};

/// Result of an operation guarded by the single-flight lock.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran.
    Completed,
    /// Another operation was in flight; nothing was done.
    Busy,
}

impl Outcome {
    /// Whether the call was rejected by the single-flight lock.
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// How [`ProxyOrchestrator::start`] treats occupied proxy ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Ask the observer before reclaiming.
    Interactive,
    /// Never reclaim; record the conflict and fail.
    Unattended,
}

/// Receives progress from long-running operations.
///
/// Every method has a default, so observers implement only what they show.
pub trait StatusObserver: Send + Sync {
    /// A human-readable step is starting.
    fn phase(&self, _phase: &str) {}

    /// Proxy ports are taken; return `true` to kill their owners.
    fn confirm_reclaim(&self, _conflicts: &[PortConflict]) -> bool {
        false
    }

    /// The selected adapter vanished and the session was stopped.
    fn adapter_lost(&self, _adapter: &str) {}

    /// The selection moved to the default-route adapter.
    fn adapter_switched(&self, _from: Option<&str>, _to: &str) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl StatusObserver for SilentObserver {}

/// Liveness of the two supervised parts, read fresh on every query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// A proxy process is running.
    pub proxy_running: bool,
    /// The resolver service is running.
    pub resolver_running: bool,
}

impl RuntimeState {
    /// Both parts are up.
    #[must_use]
    pub const fn is_running(self) -> bool {
        self.proxy_running && self.resolver_running
    }

    /// Neither part is up.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        !self.proxy_running && !self.resolver_running
    }

    /// At least one part is up.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_idle()
    }
}

/// Drives the proxy, the resolver and adapter DNS together.
#[derive(Clone)]
pub struct ProxyOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    settings: SettingsStore,
    directory: AdapterDirectory,
    dns: DnsConfigurator,
    ports: PortReclaimer,
    proxy: ProxyProcess,
    resolver: ResolverService,
    busy: tokio::sync::Mutex<()>,
    pending_conflict: Mutex<Vec<PortConflict>>,
}

impl ProxyOrchestrator {
    /// Wires the orchestrator to `host`.
    #[must_use]
    pub fn new(host: Host, config: OrchestratorConfig, settings: SettingsStore) -> Self {
        let services = ServiceSupervisor::new(host.services);
        let ports = PortReclaimer::new(
            host.tcp_table,
            Arc::clone(&host.processes),
            services.clone(),
            config.system_http_service.clone(),
        )
        .with_waits(
            config.process_exit_wait,
            config.service_stop_wait,
            config.port_release_wait,
        );
        let proxy = ProxyProcess::new(
            Arc::clone(&host.processes),
            config.proxy.executable.clone(),
            config.proxy.working_dir.clone(),
            config.proxy.process_name.clone(),
        );
        let resolver = ResolverService::new(
            services,
            host.processes,
            host.hit_log,
            config.resolver.clone(),
        )
        .with_waits(config.service_stop_wait, config.service_install_wait);

        Self {
            inner: Arc::new(Inner {
                directory: AdapterDirectory::new(host.adapters),
                dns: DnsConfigurator::new(host.ipv4_dns, host.ipv6_dns, host.dns_cache),
                ports,
                proxy,
                resolver,
                settings,
                config,
                busy: tokio::sync::Mutex::new(()),
                pending_conflict: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The settings store.
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The resolver service, for install and uninstall flows.
    #[must_use]
    pub fn resolver(&self) -> &ResolverService {
        &self.inner.resolver
    }

    /// Proxy and resolver liveness.
    pub async fn runtime_state(&self) -> RuntimeState {
        let proxy = self.inner.proxy.clone();
        let resolver = self.inner.resolver.clone();
        let probe = move || RuntimeState {
            proxy_running: proxy.is_running(),
            resolver_running: resolver.is_running(),
        };
        match tokio::task::spawn_blocking(probe).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Runtime state query did not complete");
                RuntimeState::default()
            }
        }
    }

    /// Starts the proxy and the resolver and redirects the selected adapter.
    ///
    /// # Errors
    ///
    /// [`Error::NoAdapterSelected`] and [`Error::AdapterNotFound`] are raised
    /// before anything changes. [`Error::PortConflict`] when the proxy ports
    /// are taken and reclaiming was not authorized. Any later failure aborts
    /// the remaining steps.
    pub async fn start(&self, mode: StartMode, observer: &dyn StatusObserver) -> Result<Outcome> {
        let Ok(_guard) = self.inner.busy.try_lock() else {
            tracing::debug!("Start ignored, another operation is in progress");
            return Ok(Outcome::Busy);
        };

        let adapter = self.selected_adapter().await?;
        let state = self.runtime_state().await;
        let hit_log = self.inner.settings.read(|s| s.resolver_hit_log);

        if !state.proxy_running {
            // A running proxy holds the ports itself.
            self.ensure_ports_free(mode, observer).await?;
            observer.phase("Starting proxy");
            let proxy = self.inner.proxy.clone();
            blocking(move || proxy.start()).await??;
        }

        if !state.resolver_running {
            observer.phase("Starting DNS resolver");
            self.inner.resolver.start(hit_log).await?;
        }

        observer.phase("Redirecting adapter DNS");
        self.apply_loopback(&adapter).await?;

        observer.phase("Flushing DNS cache");
        self.inner.dns.flush_cache().await;

        tracing::info!(adapter = %adapter.friendly_name, "Redirection started");
        Ok(Outcome::Completed)
    }

    /// Stops the proxy and the resolver and restores the selected adapter.
    ///
    /// # Errors
    ///
    /// Returns the first step failure, after every step has run.
    pub async fn stop(&self, observer: &dyn StatusObserver) -> Result<Outcome> {
        let Ok(_guard) = self.inner.busy.try_lock() else {
            tracing::debug!("Stop ignored, another operation is in progress");
            return Ok(Outcome::Busy);
        };

        let state = self.runtime_state().await;
        let selected = self
            .inner
            .settings
            .read(|s| s.selected_adapter().map(str::to_owned));
        let mut first_error = None;

        if state.proxy_running {
            observer.phase("Stopping proxy");
            let proxy = self.inner.proxy.clone();
            if let Err(e) = blocking(move || proxy.stop()).await.and_then(|r| r) {
                note_failure(&mut first_error, "proxy", e);
            }
        }

        if state.resolver_running {
            observer.phase("Stopping DNS resolver");
            match self.inner.resolver.stop().await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("DNS resolver did not stop in time"),
                Err(e) => note_failure(&mut first_error, "resolver", e),
            }
        }

        if let Some(name) = selected {
            let has_backup = self
                .inner
                .settings
                .read(|s| s.adapter_backups.contains_key(&name));
            if has_backup {
                match self.inner.directory.find_by_name(&name).await {
                    Ok(Some(adapter)) => {
                        observer.phase("Restoring adapter DNS");
                        if let Err(e) = self.restore(&adapter, true).await {
                            note_failure(&mut first_error, "restore", e);
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(adapter = %name, "Selected adapter not present, keeping DNS backup");
                    }
                    Err(e) => note_failure(&mut first_error, "restore", e),
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("Redirection stopped");
                Ok(Outcome::Completed)
            }
        }
    }

    /// Backs up `adapter` (unless it is already on loopback) and points its
    /// DNS at loopback.
    ///
    /// # Errors
    ///
    /// [`Error::DnsApplyFailed`] if neither family could be set.
    pub async fn set_loopback_dns(&self, adapter: &NetworkAdapter) -> Result<Outcome> {
        let Ok(_guard) = self.inner.busy.try_lock() else {
            return Ok(Outcome::Busy);
        };
        self.apply_loopback(adapter).await?;
        Ok(Outcome::Completed)
    }

    /// Restores `adapter` from its backup. Without a backup this does
    /// nothing. The backup is removed afterwards when `delete_backup` is set.
    ///
    /// # Errors
    ///
    /// [`Error::DnsApplyFailed`] if a family could not be restored; the
    /// backup is then kept.
    pub async fn restore_dns(&self, adapter: &NetworkAdapter, delete_backup: bool) -> Result<Outcome> {
        let Ok(_guard) = self.inner.busy.try_lock() else {
            return Ok(Outcome::Busy);
        };
        self.restore(adapter, delete_backup).await?;
        Ok(Outcome::Completed)
    }

    /// Moves the selection to `adapter`.
    ///
    /// While a session is active the previous adapter is restored first and
    /// only then is `adapter` redirected, so two adapters are never on
    /// loopback at the same time. If the previous adapter is present but its
    /// restore fails, nothing else changes: its backup and the selection stay
    /// as they were.
    ///
    /// # Errors
    ///
    /// Fails if the previous adapter could not be restored, if `adapter`
    /// could not be redirected or if the selection could not be saved.
    pub async fn retarget(&self, adapter: &NetworkAdapter, observer: &dyn StatusObserver) -> Result<Outcome> {
        let Ok(_guard) = self.inner.busy.try_lock() else {
            return Ok(Outcome::Busy);
        };

        let previous = self
            .inner
            .settings
            .read(|s| s.selected_adapter().map(str::to_owned));
        if previous.as_deref() == Some(adapter.friendly_name.as_str()) {
            return Ok(Outcome::Completed);
        }
        tracing::info!(
            from = previous.as_deref().unwrap_or("<none>"),
            to = %adapter.friendly_name,
            "Switching adapter"
        );

        let mut redirected = Ok(());
        if self.runtime_state().await.is_active() {
            if let Some(old_name) = &previous {
                self.restore_by_name(old_name).await?;
            }
            redirected = self.apply_loopback(adapter).await;
            self.inner.dns.flush_cache().await;
        }

        self.inner
            .settings
            .update(|s| s.selected_adapter = Some(adapter.friendly_name.clone()));
        self.inner.settings.flush_now().await?;
        observer.adapter_switched(previous.as_deref(), &adapter.friendly_name);

        redirected.map(|()| Outcome::Completed)
    }

    /// Selects the adapter named `name`, moving an active redirection to it.
    ///
    /// # Errors
    ///
    /// [`Error::AdapterNotFound`] if no adapter has that name.
    pub async fn select_adapter(&self, name: &str) -> Result<Outcome> {
        let adapter = self.inner.directory.find_by_name(name).await?;
        let adapter = adapter.ok_or_else(|| Error::AdapterNotFound { name: name.to_string() })?;
        self.retarget(&adapter, &SilentObserver).await
    }

    /// Turns following the default-route adapter on or off.
    ///
    /// # Errors
    ///
    /// Fails if the setting cannot be saved.
    pub async fn set_auto_switch(&self, enabled: bool) -> Result<()> {
        self.inner
            .settings
            .update(|s| s.auto_switch_adapter = enabled);
        self.inner.settings.flush_now().await
    }

    /// Lists adapters in `scope`.
    ///
    /// # Errors
    ///
    /// Fails if the adapter inventory cannot be read.
    pub async fn list_adapters(&self, scope: AdapterScope) -> Result<Vec<NetworkAdapter>> {
        self.inner.directory.list(scope).await
    }

    /// The adapter carrying the default route.
    pub async fn default_adapter(&self) -> Option<NetworkAdapter> {
        self.inner.directory.default_route_adapter().await
    }

    /// Proxy ports currently held by other processes.
    ///
    /// # Errors
    ///
    /// Fails only if the lookup task cannot be joined.
    pub async fn port_conflicts(&self) -> Result<Vec<PortConflict>> {
        let ports = self.inner.ports.clone();
        let wanted = self.inner.config.proxy.ports.clone();
        blocking(move || ports.conflicts(&wanted)).await
    }

    /// Frees the proxy ports by killing their owners.
    ///
    /// # Errors
    ///
    /// [`Error::PortConflict`] if ports are still taken afterwards.
    pub async fn reclaim_ports(&self) -> Result<()> {
        self.inner.ports.reclaim(&self.inner.config.proxy.ports).await?;
        self.set_pending_conflict(Vec::new());
        Ok(())
    }

    /// The conflict that made the last unattended start fail, if any.
    #[must_use]
    pub fn pending_port_conflict(&self) -> Vec<PortConflict> {
        self.inner
            .pending_conflict
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn selected_adapter(&self) -> Result<NetworkAdapter> {
        let name = self
            .inner
            .settings
            .read(|s| s.selected_adapter().map(str::to_owned))
            .ok_or(Error::NoAdapterSelected)?;
        let found = self.inner.directory.find_by_name(&name).await?;
        found.ok_or(Error::AdapterNotFound { name })
    }

    async fn ensure_ports_free(&self, mode: StartMode, observer: &dyn StatusObserver) -> Result<()> {
        let conflicts = self.port_conflicts().await?;
        if conflicts.is_empty() {
            self.set_pending_conflict(Vec::new());
            return Ok(());
        }

        let ports: Vec<u16> = conflicts.iter().map(|c| c.port).collect();
        tracing::warn!(?ports, "Proxy ports are in use");
        match mode {
            StartMode::Unattended => {
                self.set_pending_conflict(conflicts);
                return Err(Error::PortConflict { ports });
            }
            StartMode::Interactive => {
                if !observer.confirm_reclaim(&conflicts) {
                    return Err(Error::PortConflict { ports });
                }
            }
        }

        observer.phase("Freeing proxy ports");
        self.inner.ports.reclaim(&ports).await?;
        self.set_pending_conflict(Vec::new());
        Ok(())
    }

    fn set_pending_conflict(&self, conflicts: Vec<PortConflict>) {
        *self
            .inner
            .pending_conflict
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = conflicts;
    }

    async fn apply_loopback(&self, adapter: &NetworkAdapter) -> Result<()> {
        let name = &adapter.friendly_name;
        let config = &self.inner.config;
        let already_loopback = adapter
            .ipv4_dns()
            .first()
            .is_some_and(|s| *s == config.loopback_ipv4);

        if already_loopback {
            let has_backup = self
                .inner
                .settings
                .read(|s| s.adapter_backups.contains_key(name));
            if !has_backup {
                tracing::warn!(adapter = %name, "Adapter already points at loopback and has no DNS backup");
            }
        } else {
            tracing::info!(adapter = %name, "Backing up DNS settings");
            let backup = capture_backup(adapter);
            self.inner
                .settings
                .update(|s| s.adapter_backups.insert(name.clone(), backup));
            self.inner.settings.flush_now().await?;
        }

        let ipv4 = [config.loopback_ipv4.clone()];
        let ipv6 = [config.loopback_ipv6.clone()];
        let ipv4_ok = self.inner.dns.set_ipv4(adapter, &ipv4).await;
        let ipv6_ok = self.inner.dns.set_ipv6(adapter, &ipv6).await;
        match (ipv4_ok, ipv6_ok) {
            (true, true) => {
                tracing::info!(adapter = %name, "Adapter DNS redirected to loopback");
                Ok(())
            }
            (false, false) => Err(Error::DnsApplyFailed {
                adapter: name.clone(),
            }),
            (ipv4_ok, _) => {
                let failed = if ipv4_ok { "IPv6" } else { "IPv4" };
                tracing::warn!(adapter = %name, family = failed, "Adapter DNS only partly redirected");
                Ok(())
            }
        }
    }

    async fn restore(&self, adapter: &NetworkAdapter, delete_backup: bool) -> Result<bool> {
        let name = &adapter.friendly_name;
        let Some(backup) = self
            .inner
            .settings
            .read(|s| s.adapter_backups.get(name).cloned())
        else {
            tracing::debug!(adapter = %name, "No DNS backup to restore");
            return Ok(false);
        };

        tracing::info!(adapter = %name, "Restoring DNS settings");
        let ipv4 = if backup.ipv4_auto {
            Vec::new()
        } else {
            backup.ipv4_servers
        };
        let ipv6 = if backup.ipv6_auto {
            Vec::new()
        } else {
            backup.ipv6_servers
        };
        let ipv4_ok = self.inner.dns.set_ipv4(adapter, &ipv4).await;
        let ipv6_ok = self.inner.dns.set_ipv6(adapter, &ipv6).await;
        if !(ipv4_ok && ipv6_ok) {
            return Err(Error::DnsApplyFailed {
                adapter: name.clone(),
            });
        }

        if delete_backup {
            self.inner.settings.update(|s| s.adapter_backups.remove(name));
            self.inner.settings.flush_now().await?;
        }
        Ok(true)
    }

    /// Restores the adapter named `name` if it is still present.
    async fn restore_by_name(&self, name: &str) -> Result<bool> {
        let adapters = self.inner.directory.list(AdapterScope::All).await?;
        let Some(adapter) = adapters.iter().find(|a| a.friendly_name == name) else {
            tracing::warn!(adapter = %name, "Previous adapter not present, nothing to restore");
            return Ok(false);
        };
        self.restore(adapter, true).await.inspect_err(|e| {
            tracing::error!(adapter = %name, error = %e, "Failed to restore previous adapter");
        })
    }
}

fn capture_backup(adapter: &NetworkAdapter) -> AdapterDnsBackup {
    AdapterDnsBackup {
        ipv4_servers: adapter
            .ipv4_dns()
            .iter()
            .filter(|s| s.parse::<Ipv4Addr>().is_ok_and(|ip| ip != Ipv4Addr::LOCALHOST))
            .cloned()
            .collect(),
        ipv6_servers: adapter
            .ipv6_dns()
            .iter()
            .filter(|s| s.parse::<Ipv6Addr>().is_ok_and(|ip| ip != Ipv6Addr::LOCALHOST))
            .cloned()
            .collect(),
        ipv4_auto: adapter.ipv4_dns_auto(),
        ipv6_auto: adapter.ipv6_dns_auto(),
    }
}

fn note_failure(first: &mut Option<Error>, step: &'static str, error: Error) {
    tracing::error!(step, error = %error, "Stop step failed");
    first.get_or_insert(error);
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

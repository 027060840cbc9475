//! Finding and freeing the TCP ports the proxy binds.

use crate::adapter::IpFamily;
use crate::error::{Error, Result};
use crate::process::ProcessControl;
use crate::retry::RetryPolicy;
use crate::service::ServiceSupervisor;
use std::sync::Arc;
use std::time::Duration;

/// PID the OS reports for sockets owned by the kernel HTTP listener.
pub const SYSTEM_PID: u32 = 4;

/// The OS TCP connection table, owner-PID variant.
pub trait TcpTable: Send + Sync {
    /// PID owning a socket bound locally to `port`, or 0 if none.
    ///
    /// # Errors
    ///
    /// Fails if the table cannot be read.
    fn owner_pid(&self, port: u16, family: IpFamily) -> Result<u32>;
}

/// A port held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConflict {
    /// The occupied port.
    pub port: u16,
    /// Owning process.
    pub pid: u32,
}

/// Detects and breaks port conflicts.
#[derive(Clone)]
pub struct PortReclaimer {
    table: Arc<dyn TcpTable>,
    processes: Arc<dyn ProcessControl>,
    services: ServiceSupervisor,
    system_http_service: String,
    exit_wait: RetryPolicy,
    service_wait: RetryPolicy,
    release_wait: RetryPolicy,
}

impl PortReclaimer {
    /// Creates a reclaimer. Sockets owned by [`SYSTEM_PID`] are freed by
    /// stopping `system_http_service`.
    #[must_use]
    pub fn new(
        table: Arc<dyn TcpTable>,
        processes: Arc<dyn ProcessControl>,
        services: ServiceSupervisor,
        system_http_service: impl Into<String>,
    ) -> Self {
        Self {
            table,
            processes,
            services,
            system_http_service: system_http_service.into(),
            exit_wait: RetryPolicy::new(Duration::from_millis(100), 30),
            service_wait: RetryPolicy::new(Duration::from_millis(300), 30),
            release_wait: RetryPolicy::new(Duration::from_millis(500), 10),
        }
    }

    /// Overrides the bounded waits: process exit, service stop and the final
    /// wait for every port to be released.
    #[must_use]
    pub const fn with_waits(
        mut self,
        exit_wait: RetryPolicy,
        service_wait: RetryPolicy,
        release_wait: RetryPolicy,
    ) -> Self {
        self.exit_wait = exit_wait;
        self.service_wait = service_wait;
        self.release_wait = release_wait;
        self
    }

    /// PID owning `port` over IPv4, else IPv6; 0 if free or unreadable.
    #[must_use]
    pub fn owner_pid(&self, port: u16) -> u32 {
        for family in [IpFamily::V4, IpFamily::V6] {
            match self.table.owner_pid(port, family) {
                Ok(0) => {}
                Ok(pid) => return pid,
                Err(e) => {
                    tracing::warn!(port, %family, error = %e, "Failed to read TCP table");
                }
            }
        }
        0
    }

    /// Ports in `ports` held by a process other than this one.
    #[must_use]
    pub fn conflicts(&self, ports: &[u16]) -> Vec<PortConflict> {
        let own = self.processes.current_pid();
        ports
            .iter()
            .filter_map(|&port| {
                let pid = self.owner_pid(port);
                (pid != 0 && pid != own).then_some(PortConflict { port, pid })
            })
            .collect()
    }

    /// Frees every port in `ports`.
    ///
    /// Each port is handled independently and failures are logged. Once all
    /// have been processed, waits for the ports to be released. The table
    /// reads, kills and waits all run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortConflict`] listing the ports still in use.
    pub async fn reclaim(&self, ports: &[u16]) -> Result<()> {
        let this = self.clone();
        let ports = ports.to_vec();
        tokio::task::spawn_blocking(move || this.reclaim_blocking(&ports)).await?
    }

    fn reclaim_blocking(&self, ports: &[u16]) -> Result<()> {
        let own = self.processes.current_pid();
        for &port in ports {
            let pid = self.owner_pid(port);
            if pid == 0 || pid == own {
                continue;
            }
            if pid == SYSTEM_PID {
                self.stop_system_listener(port);
            } else {
                self.kill_owner(port, pid);
            }
        }

        let busy = || {
            ports
                .iter()
                .copied()
                .filter(|&port| {
                    let pid = self.owner_pid(port);
                    pid != 0 && pid != own
                })
                .collect::<Vec<_>>()
        };
        if self.release_wait.poll_blocking(|| busy().is_empty()) {
            return Ok(());
        }
        let ports = busy();
        tracing::warn!(?ports, "Ports still in use after reclaim");
        Err(Error::PortConflict { ports })
    }

    fn stop_system_listener(&self, port: u16) {
        tracing::info!(
            port,
            service = %self.system_http_service,
            "Port held by system HTTP listener, stopping service"
        );
        match self.services.stop(&self.system_http_service, self.service_wait) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(port, "System HTTP service did not stop"),
            Err(e) => tracing::error!(port, error = %e, "Failed to stop system HTTP service"),
        }
    }

    fn kill_owner(&self, port: u16, pid: u32) {
        if let Err(e) = self.processes.kill(pid) {
            tracing::error!(port, pid, error = %e, "Failed to kill port owner");
            return;
        }
        if self.exit_wait.poll_blocking(|| !self.processes.is_alive(pid)) {
            tracing::info!(port, pid, "Killed port owner");
        } else {
            tracing::warn!(port, pid, "Port owner did not exit in time");
        }
    }
}

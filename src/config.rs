//! Orchestrator configuration.

use crate::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ports the proxy binds: HTTP and HTTPS.
pub const DEFAULT_PROXY_PORTS: [u16; 2] = [80, 443];

/// The proxy executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Path to the executable.
    pub executable: PathBuf,
    /// Working directory it is launched from.
    pub working_dir: PathBuf,
    /// Name it appears under in the process table.
    pub process_name: String,
    /// TCP ports it needs free.
    pub ports: Vec<u16>,
}

/// The DNS resolver service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Service name.
    pub service_name: String,
    /// Display name used when registering.
    pub display_name: String,
    /// Service binary.
    pub executable: PathBuf,
    /// Name of the service process, for killing strays on uninstall.
    pub process_name: String,
    /// The resolver's INI configuration file.
    pub ini_path: PathBuf,
    /// Directory hit logs are written to.
    pub log_dir: PathBuf,
}

/// Everything the orchestrator needs to know about the host layout.
///
/// # Example
///
/// ```
/// use dns_redirect::OrchestratorConfig;
/// use std::time::Duration;
///
/// let config = OrchestratorConfig::for_base_dir("C:/SNIBypass")
///     .with_watchdog_interval(Duration::from_secs(10));
///
/// assert_eq!(config.proxy.ports, [80, 443]);
/// assert_eq!(config.system_http_service, "W3SVC");
/// assert_eq!(config.watchdog_interval, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// The proxy executable.
    pub proxy: ProxyConfig,
    /// The resolver service.
    pub resolver: ResolverConfig,
    /// Settings file.
    pub settings_path: PathBuf,
    /// Service that owns sockets reported under the system PID.
    pub system_http_service: String,
    /// Addresses written to the adapter while redirected.
    pub loopback_ipv4: String,
    /// IPv6 counterpart of `loopback_ipv4`.
    pub loopback_ipv6: String,
    /// Watchdog tick interval.
    pub watchdog_interval: Duration,
    /// Waiting for a service to report stopped.
    pub service_stop_wait: RetryPolicy,
    /// Waiting for a service to appear or disappear after (un)install.
    pub service_install_wait: RetryPolicy,
    /// Waiting for a killed process to exit.
    pub process_exit_wait: RetryPolicy,
    /// Waiting for ports to be released after reclaiming.
    pub port_release_wait: RetryPolicy,
}

impl OrchestratorConfig {
    /// Creates a config for the given proxy and resolver.
    #[must_use]
    pub fn new(proxy: ProxyConfig, resolver: ResolverConfig, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            proxy,
            resolver,
            settings_path: settings_path.into(),
            system_http_service: "W3SVC".into(),
            loopback_ipv4: crate::adapter::LOOPBACK_V4.into(),
            loopback_ipv6: crate::adapter::LOOPBACK_V6.into(),
            watchdog_interval: Duration::from_secs(5),
            service_stop_wait: RetryPolicy::new(Duration::from_millis(300), 100),
            service_install_wait: RetryPolicy::new(Duration::from_secs(1), 30),
            process_exit_wait: RetryPolicy::new(Duration::from_millis(100), 30),
            port_release_wait: RetryPolicy::new(Duration::from_millis(500), 10),
        }
    }

    /// Lays out the standard installation under `base`:
    ///
    /// ```text
    /// base/Data/Config.json
    /// base/Data/Logs/
    /// base/Data/Core/SNIBypass.exe
    /// base/Data/Acrylic/AcrylicService.exe
    /// base/Data/Acrylic/AcrylicConfiguration.ini
    /// ```
    #[must_use]
    pub fn for_base_dir(base: impl AsRef<Path>) -> Self {
        let data = base.as_ref().join("Data");
        let core = data.join("Core");
        let acrylic = data.join("Acrylic");
        Self::new(
            ProxyConfig {
                executable: core.join("SNIBypass.exe"),
                working_dir: core,
                process_name: "SNIBypass".into(),
                ports: DEFAULT_PROXY_PORTS.to_vec(),
            },
            ResolverConfig {
                service_name: "AcrylicDNSProxySvc".into(),
                display_name: "Acrylic DNS Proxy".into(),
                executable: acrylic.join("AcrylicService.exe"),
                process_name: "AcrylicService".into(),
                ini_path: acrylic.join("AcrylicConfiguration.ini"),
                log_dir: data.join("Logs"),
            },
            data.join("Config.json"),
        )
    }

    /// Overrides the watchdog interval.
    #[must_use]
    pub const fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Overrides the service that owns system-PID sockets.
    #[must_use]
    pub fn with_system_http_service(mut self, name: impl Into<String>) -> Self {
        self.system_http_service = name.into();
        self
    }

    /// Overrides the proxy ports.
    #[must_use]
    pub fn with_proxy_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.proxy.ports = ports.into();
        self
    }

    /// Replaces every bounded wait with `policy`. Tests use
    /// [`RetryPolicy::immediate`].
    #[must_use]
    pub const fn with_waits(mut self, policy: RetryPolicy) -> Self {
        self.service_stop_wait = policy;
        self.service_install_wait = policy;
        self.process_exit_wait = policy;
        self.port_release_wait = policy;
        self
    }
}

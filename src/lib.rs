//! # dns-redirect
//!
//! Point a network adapter's DNS at a local resolver, and keep a local
//! proxy process and the resolver service running behind it.
//!
//! The target is a Windows host running two cooperating parts: a proxy
//! executable that binds ports 80 and 443, and a DNS resolver installed as an
//! OS service. This crate owns the glue. It backs up the selected adapter's
//! DNS servers and redirects the adapter to loopback. It starts and stops
//! both parts and restores the adapter afterwards. A watchdog follows the
//! default-route adapter when it changes.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use dns_redirect::{OrchestratorConfig, ProxyOrchestrator, SettingsStore, SilentObserver, StartMode};
//!
//! let config = OrchestratorConfig::for_base_dir(r"C:\SNIBypass");
//! let settings = SettingsStore::load(&config.settings_path);
//! let host = dns_redirect::platform::system_host()?;
//! let orchestrator = ProxyOrchestrator::new(host, config, settings);
//!
//! orchestrator.select_adapter("Ethernet").await?;
//! orchestrator.start(StartMode::Interactive, &SilentObserver).await?;
//! // ...
//! orchestrator.stop(&SilentObserver).await?;
//! ```
//!
//! ## Crash safety
//!
//! The DNS backup is written to disk before the adapter is touched and is
//! removed only after a successful restore. A process that dies mid-session
//! leaves the backup behind, and the next `stop` restores from it.
//!
//! ## Testing
//!
//! Every OS surface is a trait collected in [`Host`]. The orchestrator and the
//! watchdog run unchanged against in-memory fakes; see `tests/common`.
//!
//! ## Permissions
//!
//! Changing adapter DNS, managing services and killing other processes all
//! require an elevated token. The caller is responsible for elevation.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod config;
pub mod directory;
pub mod dns;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod platform;
pub mod ports;
pub mod process;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod settings;
pub mod util;
pub mod watchdog;

pub use adapter::{AdapterId, AdapterScope, IpFamily, NetworkAdapter};
pub use config::{OrchestratorConfig, ProxyConfig, ResolverConfig};
pub use error::{Error, Result};
pub use host::Host;
pub use orchestrator::{Outcome, ProxyOrchestrator, RuntimeState, SilentObserver, StartMode, StatusObserver};
pub use ports::PortConflict;
pub use retry::RetryPolicy;
pub use service::{ServiceStatus, ServiceSupervisor};
pub use settings::{AdapterDnsBackup, PersistedSettings, SettingsStore};
pub use watchdog::{AdapterWatchdog, TickOutcome};

//! The set of OS backends the orchestrator drives.

use crate::directory::AdapterSource;
use crate::dns::{DnsCache, DnsStrategy};
use crate::ports::TcpTable;
use crate::process::ProcessControl;
use crate::resolver::{HitLogTracker, NoopTracker};
use crate::service::ServiceManager;
use std::sync::Arc;

/// One implementation of every OS surface.
///
/// [`crate::platform::system_host`] builds the live one; tests build one from
/// in-memory fakes.
#[derive(Clone)]
pub struct Host {
    /// Adapter inventory and DNS state.
    pub adapters: Arc<dyn AdapterSource>,
    /// IPv4 DNS writers, in fallback order.
    pub ipv4_dns: Vec<Arc<dyn DnsStrategy>>,
    /// IPv6 DNS writers, in fallback order.
    pub ipv6_dns: Vec<Arc<dyn DnsStrategy>>,
    /// Resolver cache.
    pub dns_cache: Arc<dyn DnsCache>,
    /// TCP owner table.
    pub tcp_table: Arc<dyn TcpTable>,
    /// Process table.
    pub processes: Arc<dyn ProcessControl>,
    /// Service control manager.
    pub services: Arc<dyn ServiceManager>,
    /// Hit-log follower.
    pub hit_log: Arc<dyn HitLogTracker>,
}

impl Host {
    /// Replaces the hit-log tracker.
    #[must_use]
    pub fn with_hit_log_tracker(mut self, tracker: Arc<dyn HitLogTracker>) -> Self {
        self.hit_log = tracker;
        self
    }

    /// The default tracker.
    #[must_use]
    pub fn noop_tracker() -> Arc<dyn HitLogTracker> {
        Arc::new(NoopTracker)
    }
}

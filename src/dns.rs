//! Applying DNS server lists to an adapter.
//!
//! Each IP family has an ordered list of [`DnsStrategy`] values. The first is
//! the clean configuration API; later ones are fallbacks that keep working
//! when the adapter is disconnected or the configuration service is unhealthy
//! (a direct write of the adapter's registry parameters). Strategies are tried
//! in order, each at most once per call, until one succeeds.

use crate::adapter::{IpFamily, NetworkAdapter};
use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// One way of writing an adapter's DNS servers.
pub trait DnsStrategy: Send + Sync {
    /// Short name used in logs (`"cim"`, `"netsh"`, `"registry"`).
    fn name(&self) -> &'static str;

    /// Writes `servers` (empty = automatic) to `adapter`.
    fn apply<'a>(
        &'a self,
        adapter: &'a NetworkAdapter,
        servers: &'a [String],
    ) -> BoxFuture<'a, Result<()>>;
}

/// The OS resolver cache.
pub trait DnsCache: Send + Sync {
    /// Flushes cached lookups.
    ///
    /// # Errors
    ///
    /// Fails if the cache service rejects the request.
    fn flush(&self) -> Result<()>;
}

/// Writes DNS server lists, falling back between strategies.
#[derive(Clone)]
pub struct DnsConfigurator {
    ipv4: Vec<Arc<dyn DnsStrategy>>,
    ipv6: Vec<Arc<dyn DnsStrategy>>,
    cache: Arc<dyn DnsCache>,
}

impl DnsConfigurator {
    /// Creates a configurator from ordered strategy lists.
    #[must_use]
    pub fn new(
        ipv4: Vec<Arc<dyn DnsStrategy>>,
        ipv6: Vec<Arc<dyn DnsStrategy>>,
        cache: Arc<dyn DnsCache>,
    ) -> Self {
        Self { ipv4, ipv6, cache }
    }

    /// Sets the IPv4 servers of `adapter`. Returns `true` on success.
    pub async fn set_ipv4(&self, adapter: &NetworkAdapter, servers: &[String]) -> bool {
        apply_in_order(&self.ipv4, IpFamily::V4, adapter, servers).await
    }

    /// Sets the IPv6 servers of `adapter`. Returns `true` on success, in which
    /// case the resolver cache is also flushed.
    pub async fn set_ipv6(&self, adapter: &NetworkAdapter, servers: &[String]) -> bool {
        let ok = apply_in_order(&self.ipv6, IpFamily::V6, adapter, servers).await;
        if ok {
            self.flush_cache().await;
        }
        ok
    }

    /// Sets the servers for one family.
    pub async fn set(&self, family: IpFamily, adapter: &NetworkAdapter, servers: &[String]) -> bool {
        match family {
            IpFamily::V4 => self.set_ipv4(adapter, servers).await,
            IpFamily::V6 => self.set_ipv6(adapter, servers).await,
        }
    }

    /// Flushes the OS resolver cache. Failures are logged.
    pub async fn flush_cache(&self) -> bool {
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.flush()).await {
            Ok(Ok(())) => {
                tracing::info!("DNS resolver cache flushed");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to flush DNS resolver cache");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "DNS cache flush did not complete");
                false
            }
        }
    }
}

async fn apply_in_order(
    strategies: &[Arc<dyn DnsStrategy>],
    family: IpFamily,
    adapter: &NetworkAdapter,
    servers: &[String],
) -> bool {
    for (attempt, strategy) in strategies.iter().enumerate() {
        match strategy.apply(adapter, servers).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(
                        adapter = %adapter.friendly_name,
                        %family,
                        strategy = strategy.name(),
                        "DNS set through fallback"
                    );
                } else {
                    tracing::debug!(
                        adapter = %adapter.friendly_name,
                        %family,
                        strategy = strategy.name(),
                        "DNS set"
                    );
                }
                return true;
            }
            Err(e) => tracing::warn!(
                adapter = %adapter.friendly_name,
                %family,
                strategy = strategy.name(),
                error = %e,
                "DNS strategy failed"
            ),
        }
    }
    tracing::error!(adapter = %adapter.friendly_name, %family, "All DNS strategies failed");
    false
}

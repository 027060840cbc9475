//! Adapter discovery.
//!
//! A usable adapter record is stitched together from three independent OS
//! sources, joined on [`AdapterId`]:
//!
//! 1. the adapter inventory (names, index, status, IPv4 DNS),
//! 2. per-interface IPv6 DNS servers (the inventory's IPv6 data is unreliable),
//! 3. the per-family "NameServer" registry values that tell whether DNS is
//!    obtained automatically.
//!
//! Only a failed inventory fails discovery; a bad entry or an unavailable
//! auxiliary source degrades to defaults and is logged.

use crate::adapter::{AdapterId, AdapterInfo, AdapterScope, DnsState, IpFamily, NetworkAdapter};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// One raw inventory row, before it is joined with the other sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Internal adapter name.
    pub name: String,
    /// Friendly name; may be empty for hidden adapters.
    pub friendly_name: String,
    /// Hardware description.
    pub description: String,
    /// Interface index.
    pub interface_index: u32,
    /// Adapter GUID as reported by the OS, unparsed.
    pub guid: String,
    /// Whether the adapter is enabled.
    pub enabled: bool,
    /// Connection status code.
    pub connection_status: u16,
    /// Whether the adapter is backed by hardware.
    pub physical: bool,
    /// IPv4 DNS search order, or `None` if it could not be read for this
    /// adapter.
    pub ipv4_dns: Option<Vec<String>>,
}

/// The OS sources discovery reads from.
pub trait AdapterSource: Send + Sync {
    /// Lists the adapter inventory.
    ///
    /// # Errors
    ///
    /// Fails when the inventory itself is unavailable.
    fn inventory(&self) -> Result<Vec<InventoryEntry>>;

    /// IPv6 DNS servers per adapter, from the interface properties API.
    ///
    /// # Errors
    ///
    /// Fails when the interface table cannot be read.
    fn ipv6_dns(&self) -> Result<HashMap<AdapterId, Vec<String>>>;

    /// Whether DNS is automatic, per adapter, for one family. Adapters absent
    /// from the map are treated as automatic.
    ///
    /// # Errors
    ///
    /// Fails when the configuration store cannot be read.
    fn dns_auto(&self, family: IpFamily) -> Result<HashMap<AdapterId, bool>>;

    /// Interface index the OS would use to reach an arbitrary public address.
    ///
    /// # Errors
    ///
    /// Fails when the routing table cannot be queried.
    fn best_interface_index(&self) -> Result<u32>;
}

/// Read-only view of the host's adapters.
#[derive(Clone)]
pub struct AdapterDirectory {
    source: Arc<dyn AdapterSource>,
}

impl AdapterDirectory {
    /// Creates a directory over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn AdapterSource>) -> Self {
        Self { source }
    }

    /// Lists adapters in `scope`, in inventory order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the inventory cannot be read.
    pub async fn list(&self, scope: AdapterScope) -> Result<Vec<NetworkAdapter>> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || discover(source.as_ref(), scope, None)).await?
    }

    /// Re-reads `adapter`. Returns `None` if it has vanished.
    ///
    /// # Errors
    ///
    /// Returns an error only when the inventory cannot be read.
    pub async fn refresh(&self, adapter: &NetworkAdapter) -> Result<Option<NetworkAdapter>> {
        let source = Arc::clone(&self.source);
        let id = adapter.id.clone();
        let found = tokio::task::spawn_blocking(move || {
            discover(source.as_ref(), AdapterScope::All, Some(&id))
        })
        .await??;
        Ok(found.into_iter().next())
    }

    /// Looks up an adapter with a friendly name.
    ///
    /// # Errors
    ///
    /// Returns an error only when the inventory cannot be read.
    pub async fn find_by_name(&self, friendly_name: &str) -> Result<Option<NetworkAdapter>> {
        Ok(self
            .list(AdapterScope::FriendlyNameOnly)
            .await?
            .into_iter()
            .find(|a| a.friendly_name == friendly_name))
    }

    /// The adapter carrying the default route, if the OS can tell.
    pub async fn default_route_adapter(&self) -> Option<NetworkAdapter> {
        let source = Arc::clone(&self.source);
        let index = match tokio::task::spawn_blocking(move || source.best_interface_index()).await
        {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to query default route interface");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Default route query did not complete");
                return None;
            }
        };

        match self.list(AdapterScope::FriendlyNameOnly).await {
            Ok(adapters) => adapters.into_iter().find(|a| a.interface_index == index),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list adapters for default route");
                None
            }
        }
    }
}

/// Runs one discovery pass against `source`.
///
/// # Errors
///
/// Returns an error only when the inventory cannot be read.
pub fn discover(
    source: &dyn AdapterSource,
    scope: AdapterScope,
    only: Option<&AdapterId>,
) -> Result<Vec<NetworkAdapter>> {
    let ipv6_dns = source.ipv6_dns().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to read IPv6 DNS servers");
        HashMap::new()
    });
    let auto_flags = |family| {
        source.dns_auto(family).unwrap_or_else(|e| {
            tracing::warn!(%family, error = %e, "Failed to read DNS auto flags");
            HashMap::new()
        })
    };
    let ipv4_auto = auto_flags(IpFamily::V4);
    let ipv6_auto = auto_flags(IpFamily::V6);

    let mut adapters = Vec::new();
    for entry in source.inventory()? {
        let id = match entry.guid.parse::<AdapterId>() {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(adapter = %entry.name, error = %e, "Skipping adapter without usable id");
                continue;
            }
        };
        if only.is_some_and(|wanted| *wanted != id) {
            continue;
        }

        let ipv4 = match entry.ipv4_dns {
            Some(servers) => servers.into_iter().filter(|s| !s.contains(':')).collect(),
            None => {
                tracing::debug!(adapter = %entry.name, "IPv4 DNS unavailable, assuming none");
                Vec::new()
            }
        };
        let dns = DnsState {
            ipv4,
            ipv4_auto: ipv4_auto.get(&id).copied().unwrap_or(true),
            ipv6: ipv6_dns.get(&id).cloned().unwrap_or_default(),
            ipv6_auto: ipv6_auto.get(&id).copied().unwrap_or(true),
        };
        let info = AdapterInfo {
            name: entry.name,
            friendly_name: entry.friendly_name,
            description: entry.description,
            interface_index: entry.interface_index,
            id,
            enabled: entry.enabled,
            connection_status: entry.connection_status,
            physical: entry.physical,
        };

        let adapter = NetworkAdapter::new(info, dns);
        if scope.admits(&adapter) {
            adapters.push(adapter);
        }
    }
    Ok(adapters)
}

//! Network adapter snapshots.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Connection status reported for a connected adapter.
pub const STATUS_CONNECTED: u16 = 2;

/// IPv4 loopback resolver address.
pub const LOOPBACK_V4: &str = "127.0.0.1";

/// IPv6 loopback resolver address.
pub const LOOPBACK_V6: &str = "::1";

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        })
    }
}

/// Stable adapter identity (a GUID), independent of the interface index.
///
/// Parsing accepts braced or bare GUIDs in any case; the canonical form is
/// braced upper-case, which is the name of the adapter's registry key.
///
/// ```
/// use dns_redirect::AdapterId;
///
/// let id: AdapterId = "4d36e972-e325-11ce-bfc1-08002be10318".parse().unwrap();
/// assert_eq!(id.as_str(), "{4D36E972-E325-11CE-BFC1-08002BE10318}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(String);

impl AdapterId {
    /// Returns the braced canonical form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AdapterId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed);

        let groups: Vec<&str> = bare.split('-').collect();
        let well_formed = groups.len() == 5
            && groups
                .iter()
                .zip([8, 4, 4, 4, 12])
                .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_hexdigit()));

        if !well_formed {
            return Err(Error::InvalidAdapterId(s.to_string()));
        }
        Ok(Self(format!("{{{}}}", bare.to_ascii_uppercase())))
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filter applied when listing adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterScope {
    /// Every adapter the inventory reports.
    #[default]
    All,
    /// Adapters that are enabled.
    EnabledOnly,
    /// Adapters whose connection status is "connected".
    ConnectedOnly,
    /// Hardware adapters only.
    PhysicalOnly,
    /// Adapters with a non-empty friendly name (the ones a user can pick).
    FriendlyNameOnly,
}

impl AdapterScope {
    /// Returns `true` if `adapter` is inside this scope.
    #[must_use]
    pub fn admits(self, adapter: &NetworkAdapter) -> bool {
        match self {
            Self::All => true,
            Self::EnabledOnly => adapter.enabled,
            Self::ConnectedOnly => adapter.connection_status == STATUS_CONNECTED,
            Self::PhysicalOnly => adapter.physical,
            Self::FriendlyNameOnly => !adapter.friendly_name.is_empty(),
        }
    }
}

/// Immutable snapshot of one adapter and its DNS configuration.
///
/// Built fresh on every discovery call. When a family's DNS is automatic its
/// server list is always empty; [`NetworkAdapter::new`] enforces this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapter {
    /// Internal adapter name.
    pub name: String,
    /// Name shown to the user (e.g. `"Ethernet"`).
    pub friendly_name: String,
    /// Hardware description.
    pub description: String,
    /// OS-assigned interface index; may be reused across reboots.
    pub interface_index: u32,
    /// Stable identity.
    pub id: AdapterId,
    /// Whether the adapter is enabled.
    pub enabled: bool,
    /// Connection status code ([`STATUS_CONNECTED`] when up).
    pub connection_status: u16,
    /// Whether the adapter is backed by hardware.
    pub physical: bool,
    ipv4_dns: Vec<String>,
    ipv4_dns_auto: bool,
    ipv6_dns: Vec<String>,
    ipv6_dns_auto: bool,
}

/// Base fields of a [`NetworkAdapter`], before DNS data is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Internal adapter name.
    pub name: String,
    /// Name shown to the user.
    pub friendly_name: String,
    /// Hardware description.
    pub description: String,
    /// OS-assigned interface index.
    pub interface_index: u32,
    /// Stable identity.
    pub id: AdapterId,
    /// Whether the adapter is enabled.
    pub enabled: bool,
    /// Connection status code.
    pub connection_status: u16,
    /// Whether the adapter is backed by hardware.
    pub physical: bool,
}

/// DNS state of one adapter, per family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsState {
    /// IPv4 servers.
    pub ipv4: Vec<String>,
    /// IPv4 DNS obtained automatically.
    pub ipv4_auto: bool,
    /// IPv6 servers.
    pub ipv6: Vec<String>,
    /// IPv6 DNS obtained automatically.
    pub ipv6_auto: bool,
}

impl NetworkAdapter {
    /// Builds a snapshot, discarding server lists for automatic families.
    #[must_use]
    pub fn new(info: AdapterInfo, dns: DnsState) -> Self {
        let DnsState {
            ipv4,
            ipv4_auto,
            ipv6,
            ipv6_auto,
        } = dns;
        Self {
            name: info.name,
            friendly_name: info.friendly_name,
            description: info.description,
            interface_index: info.interface_index,
            id: info.id,
            enabled: info.enabled,
            connection_status: info.connection_status,
            physical: info.physical,
            ipv4_dns: if ipv4_auto { Vec::new() } else { ipv4 },
            ipv4_dns_auto: ipv4_auto,
            ipv6_dns: if ipv6_auto { Vec::new() } else { ipv6 },
            ipv6_dns_auto: ipv6_auto,
        }
    }

    /// Configured IPv4 servers (empty when automatic).
    #[must_use]
    pub fn ipv4_dns(&self) -> &[String] {
        &self.ipv4_dns
    }

    /// Whether IPv4 DNS is obtained automatically.
    #[must_use]
    pub const fn ipv4_dns_auto(&self) -> bool {
        self.ipv4_dns_auto
    }

    /// Configured IPv6 servers (empty when automatic).
    #[must_use]
    pub fn ipv6_dns(&self) -> &[String] {
        &self.ipv6_dns
    }

    /// Whether IPv6 DNS is obtained automatically.
    #[must_use]
    pub const fn ipv6_dns_auto(&self) -> bool {
        self.ipv6_dns_auto
    }

    /// Returns `true` if the first IPv4 server is the loopback resolver.
    #[must_use]
    pub fn is_loopback_dns(&self) -> bool {
        self.ipv4_dns.first().is_some_and(|s| s == LOOPBACK_V4)
    }
}

//! Live OS backends.
//!
//! The full backend set exists only on Windows. Linux provides the TCP owner
//! table so port lookups work there too.

use crate::host::Host;
use crate::ports::TcpTable;
use std::sync::Arc;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(windows)]
pub mod windows;

/// `CREATE_NO_WINDOW` process creation flag.
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Builds the backends of the running OS.
///
/// # Errors
///
/// [`crate::Error::Unsupported`] on platforms without a backend.
#[cfg(windows)]
pub fn system_host() -> crate::Result<Host> {
    Ok(windows::host())
}

/// Builds the backends of the running OS.
///
/// # Errors
///
/// [`crate::Error::Unsupported`] on platforms without a backend.
#[cfg(not(windows))]
pub fn system_host() -> crate::Result<Host> {
    Err(crate::Error::Unsupported {
        what: "adapter DNS configuration on this platform",
    })
}

/// The OS TCP owner table, where one is available.
#[must_use]
pub fn system_tcp_table() -> Option<Arc<dyn TcpTable>> {
    #[cfg(windows)]
    {
        Some(Arc::new(windows::IpHelperTcpTable))
    }
    #[cfg(target_os = "linux")]
    {
        Some(Arc::new(linux::ProcTcpTable::new()))
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        None
    }
}

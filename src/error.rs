//! Error types.

use thiserror::Error;

/// Result alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the orchestration core.
///
/// Expected idempotent conditions (service already stopped, no backup to
/// restore) never appear here; they are normalized to success by the
/// components that observe them.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file could not be encoded or decoded.
    #[error("settings encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking OS call could not be joined.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// No adapter is selected, so there is nothing to redirect.
    #[error("no network adapter selected")]
    NoAdapterSelected,

    /// The selected adapter is not present on this host.
    #[error("network adapter not found: {name}")]
    AdapterNotFound {
        /// Friendly name that was looked up.
        name: String,
    },

    /// One or more proxy ports are held by another process.
    #[error("ports in use: {}", format_ports(.ports))]
    PortConflict {
        /// The occupied ports.
        ports: Vec<u16>,
    },

    /// Neither DNS mechanism could configure the adapter.
    #[error("failed to apply DNS servers to adapter {adapter}")]
    DnsApplyFailed {
        /// Friendly name of the adapter.
        adapter: String,
    },

    /// The service control manager itself could not be reached.
    #[error("service control manager unavailable (os error {code})")]
    ServiceManagerUnavailable {
        /// Raw OS error code.
        code: u32,
    },

    /// A service operation failed for a reason other than an expected state.
    #[error("service {name}: {operation} failed")]
    Service {
        /// Service name.
        name: String,
        /// The operation that failed (`start`, `install`, ...).
        operation: &'static str,
    },

    /// A managed process could not be launched or terminated.
    #[error("process {name}: {reason}")]
    Process {
        /// Executable or process name.
        name: String,
        /// Human-readable failure.
        reason: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {stderr}")]
    Command {
        /// The program that was run.
        command: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// A string could not be parsed as an adapter identifier.
    #[error("invalid adapter id: {0}")]
    InvalidAdapterId(String),

    /// The requested OS surface is not available on this platform.
    #[error("{what} is not supported on this platform")]
    Unsupported {
        /// The missing capability.
        what: &'static str,
    },
}

impl Error {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }

    /// Returns `true` for failures a user can resolve by freeing ports.
    #[must_use]
    pub const fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict { .. })
    }
}

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

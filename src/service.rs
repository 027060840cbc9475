//! OS service supervision.
//!
//! [`ServiceManager`] is the raw service-control surface. [`ServiceSupervisor`]
//! layers the idempotency rules on top: stopping a service that is absent or
//! already stopped succeeds, starting one that already runs succeeds, and
//! deleting one already marked for deletion succeeds. Only an unreachable
//! service control manager is reported as an error.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// `ERROR_SERVICE_ALREADY_RUNNING`.
pub const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
/// `ERROR_SERVICE_DOES_NOT_EXIST`.
pub const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
/// `ERROR_SERVICE_NOT_ACTIVE`.
pub const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;
/// `ERROR_SERVICE_MARKED_FOR_DELETE`.
pub const ERROR_SERVICE_MARKED_FOR_DELETE: u32 = 1072;

/// Why a raw service call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFault {
    /// The service is not installed.
    DoesNotExist,
    /// The service is pending deletion.
    MarkedForDelete,
    /// The service is not running.
    NotActive,
    /// The service is already running.
    AlreadyRunning,
    /// The service control manager could not be opened.
    ManagerUnavailable(u32),
    /// Any other OS error code.
    Os(u32),
}

impl ServiceFault {
    /// Classifies a raw OS error code from a service call.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            ERROR_SERVICE_DOES_NOT_EXIST => Self::DoesNotExist,
            ERROR_SERVICE_MARKED_FOR_DELETE => Self::MarkedForDelete,
            ERROR_SERVICE_NOT_ACTIVE => Self::NotActive,
            ERROR_SERVICE_ALREADY_RUNNING => Self::AlreadyRunning,
            other => Self::Os(other),
        }
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoesNotExist => f.write_str("service does not exist"),
            Self::MarkedForDelete => f.write_str("service is marked for deletion"),
            Self::NotActive => f.write_str("service is not active"),
            Self::AlreadyRunning => f.write_str("service is already running"),
            Self::ManagerUnavailable(code) => write!(f, "service manager unavailable ({code})"),
            Self::Os(code) => write!(f, "os error {code}"),
        }
    }
}

/// Current state reported by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Stopped.
    Stopped,
    /// Starting, stopping, pausing or resuming.
    Pending,
    /// Running.
    Running,
    /// Paused.
    Paused,
}

/// When the OS starts a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    /// At boot.
    Automatic,
    /// On demand.
    Manual,
    /// Never.
    Disabled,
}

/// Everything needed to register a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name (registry key).
    pub name: String,
    /// Name shown in the services console.
    pub display_name: String,
    /// Path to the service binary.
    pub binary_path: PathBuf,
    /// Start type to register with.
    pub start_type: StartType,
}

/// Raw service-control operations.
pub trait ServiceManager: Send + Sync {
    /// Opens the service for status queries, proving it exists.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn open(&self, name: &str) -> std::result::Result<(), ServiceFault>;

    /// Registers a new service.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn create(&self, spec: &ServiceSpec) -> std::result::Result<(), ServiceFault>;

    /// Starts a service.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn start(&self, name: &str) -> std::result::Result<(), ServiceFault>;

    /// Sends the stop control; returns the state reported with it.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn stop(&self, name: &str) -> std::result::Result<RunState, ServiceFault>;

    /// Queries the current state.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn query(&self, name: &str) -> std::result::Result<RunState, ServiceFault>;

    /// Deletes the service registration.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn delete(&self, name: &str) -> std::result::Result<(), ServiceFault>;

    /// Changes the start mode.
    ///
    /// # Errors
    ///
    /// Returns the classified OS failure.
    fn set_start_mode(&self, name: &str, mode: StartType) -> std::result::Result<(), ServiceFault>;
}

/// Whether a service is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePresence {
    /// Not installed.
    Absent,
    /// Pending deletion; reinstalling must wait.
    MarkedForDeletion,
    /// Installed.
    Present,
}

/// Full lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Not installed.
    Absent,
    /// Pending deletion.
    MarkedForDeletion,
    /// Installed and stopped.
    Stopped,
    /// Transitioning or paused.
    Pending,
    /// Installed and running.
    Running,
}

/// Idempotent service lifecycle control.
#[derive(Clone)]
pub struct ServiceSupervisor {
    manager: Arc<dyn ServiceManager>,
}

impl ServiceSupervisor {
    /// Creates a supervisor over `manager`.
    #[must_use]
    pub fn new(manager: Arc<dyn ServiceManager>) -> Self {
        Self { manager }
    }

    /// Reports whether `name` is installed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceManagerUnavailable`] if the manager cannot be
    /// reached, and [`Error::Service`] for unexpected failures.
    pub fn check_state(&self, name: &str) -> Result<ServicePresence> {
        match self.manager.open(name) {
            Ok(()) => Ok(ServicePresence::Present),
            Err(ServiceFault::DoesNotExist) => Ok(ServicePresence::Absent),
            Err(ServiceFault::MarkedForDelete) => Ok(ServicePresence::MarkedForDeletion),
            Err(fault) => {
                tracing::debug!(service = %name, error = %fault, "Service state check failed");
                Err(fatal_or(fault, name, "open"))
            }
        }
    }

    /// Reports the lifecycle state of `name`.
    ///
    /// # Errors
    ///
    /// Same as [`check_state`](Self::check_state).
    pub fn status(&self, name: &str) -> Result<ServiceStatus> {
        match self.manager.query(name) {
            Ok(RunState::Running) => Ok(ServiceStatus::Running),
            Ok(RunState::Stopped) => Ok(ServiceStatus::Stopped),
            Ok(RunState::Pending | RunState::Paused) => Ok(ServiceStatus::Pending),
            Err(ServiceFault::DoesNotExist) => Ok(ServiceStatus::Absent),
            Err(ServiceFault::MarkedForDelete) => Ok(ServiceStatus::MarkedForDeletion),
            Err(fault) => Err(fatal_or(fault, name, "query")),
        }
    }

    /// Whether `name` is running. Any failure counts as "not running".
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        matches!(self.status(name), Ok(ServiceStatus::Running))
    }

    /// Registers `spec` and tries to start it right away.
    ///
    /// A failed start is logged but the install still succeeds; the service
    /// exists and can be started later.
    ///
    /// # Errors
    ///
    /// Fails if the service cannot be registered.
    pub fn install(&self, spec: &ServiceSpec) -> Result<()> {
        self.register(spec)?;
        match self.manager.start(&spec.name) {
            Ok(()) | Err(ServiceFault::AlreadyRunning) => {}
            Err(fault) => tracing::error!(
                service = %spec.name,
                error = %fault,
                "Failed to start service after installation"
            ),
        }
        Ok(())
    }

    /// Registers `spec` without starting it.
    ///
    /// # Errors
    ///
    /// Fails if the service cannot be registered.
    pub fn register(&self, spec: &ServiceSpec) -> Result<()> {
        if let Err(fault) = self.manager.create(spec) {
            tracing::error!(service = %spec.name, error = %fault, "Failed to create service");
            return Err(fatal_or(fault, &spec.name, "install"));
        }
        tracing::info!(service = %spec.name, path = %spec.binary_path.display(), "Installed service");
        Ok(())
    }

    /// Stops `name` and waits for it to report stopped.
    ///
    /// Returns `true` once stopped, or if the service is absent or was not
    /// running. Returns `false` when `wait` runs out.
    ///
    /// # Errors
    ///
    /// Only if the service control manager is unavailable.
    pub fn stop(&self, name: &str, wait: RetryPolicy) -> Result<bool> {
        match self.manager.stop(name) {
            Ok(RunState::Stopped) => return Ok(true),
            Ok(_) => {}
            Err(ServiceFault::NotActive | ServiceFault::DoesNotExist) => {
                tracing::debug!(service = %name, "Service already stopped");
                return Ok(true);
            }
            Err(ServiceFault::ManagerUnavailable(code)) => {
                return Err(Error::ServiceManagerUnavailable { code });
            }
            Err(fault) => {
                tracing::error!(service = %name, error = %fault, "Failed to send stop control");
            }
        }

        let mut stopped = false;
        let mut unavailable = None;
        wait.poll_blocking(|| match self.manager.query(name) {
            Ok(RunState::Stopped) | Err(ServiceFault::DoesNotExist) => {
                stopped = true;
                true
            }
            Ok(_) => false,
            Err(ServiceFault::ManagerUnavailable(code)) => {
                unavailable = Some(code);
                true
            }
            Err(fault) => {
                tracing::error!(service = %name, error = %fault, "Failed to query service status");
                true
            }
        });

        if let Some(code) = unavailable {
            return Err(Error::ServiceManagerUnavailable { code });
        }
        if stopped {
            tracing::info!(service = %name, "Service stopped");
        } else {
            tracing::warn!(service = %name, "Gave up waiting for service to stop");
        }
        Ok(stopped)
    }

    /// Stops and deletes `name`.
    ///
    /// # Errors
    ///
    /// Only if the service control manager is unavailable.
    pub fn uninstall(&self, name: &str, wait: RetryPolicy) -> Result<bool> {
        self.stop(name, wait)?;
        match self.manager.delete(name) {
            Ok(()) => {
                tracing::info!(service = %name, "Service deleted");
                Ok(true)
            }
            Err(ServiceFault::DoesNotExist | ServiceFault::MarkedForDelete) => Ok(true),
            Err(ServiceFault::ManagerUnavailable(code)) => {
                Err(Error::ServiceManagerUnavailable { code })
            }
            Err(fault) => {
                tracing::error!(service = %name, error = %fault, "Failed to delete service");
                Ok(false)
            }
        }
    }

    /// Starts `name`. Already running counts as success.
    ///
    /// # Errors
    ///
    /// Only if the service control manager is unavailable.
    pub fn start_by_name(&self, name: &str) -> Result<bool> {
        match self.manager.start(name) {
            Ok(()) => {
                tracing::info!(service = %name, "Service started");
                Ok(true)
            }
            Err(ServiceFault::AlreadyRunning) => Ok(true),
            Err(ServiceFault::ManagerUnavailable(code)) => {
                Err(Error::ServiceManagerUnavailable { code })
            }
            Err(fault) => {
                tracing::error!(service = %name, error = %fault, "Failed to start service");
                Ok(false)
            }
        }
    }

    /// Changes the start mode of `name`. Returns `false` (without error) when
    /// there is nothing to reconfigure.
    ///
    /// # Errors
    ///
    /// Only if the service control manager is unavailable.
    pub fn set_start_mode(&self, name: &str, mode: StartType) -> Result<bool> {
        match self.manager.set_start_mode(name, mode) {
            Ok(()) => Ok(true),
            Err(ServiceFault::DoesNotExist | ServiceFault::MarkedForDelete) => {
                tracing::debug!(service = %name, "No service to reconfigure");
                Ok(false)
            }
            Err(ServiceFault::ManagerUnavailable(code)) => {
                Err(Error::ServiceManagerUnavailable { code })
            }
            Err(fault) => {
                tracing::error!(service = %name, error = %fault, "Failed to change start mode");
                Ok(false)
            }
        }
    }
}

fn fatal_or(fault: ServiceFault, name: &str, operation: &'static str) -> Error {
    match fault {
        ServiceFault::ManagerUnavailable(code) => Error::ServiceManagerUnavailable { code },
        _ => Error::Service {
            name: name.to_string(),
            operation,
        },
    }
}

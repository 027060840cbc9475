//! The local DNS resolver service.
//!
//! The resolver is an opaque OS service. Besides its lifecycle, the only part
//! of its configuration touched here is the hit log: four keys in the
//! `[GlobalSection]` of its INI file. Every other line of that file is left
//! exactly as it was.

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::process::ProcessControl;
use crate::retry::RetryPolicy;
use crate::service::{ServicePresence, ServiceSpec, ServiceSupervisor, StartType};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use time::{Date, OffsetDateTime};

/// INI section holding the hit-log keys.
pub const GLOBAL_SECTION: &str = "GlobalSection";

/// Follows a hit log while the resolver writes it.
pub trait HitLogTracker: Send + Sync {
    /// Begins following `path`.
    fn start(&self, path: &Path);

    /// Stops following `path`.
    fn stop(&self, path: &Path);
}

/// A tracker that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl HitLogTracker for NoopTracker {
    fn start(&self, _path: &Path) {}

    fn stop(&self, _path: &Path) {}
}

/// Lifecycle and hit-log control of the resolver service.
#[derive(Clone)]
pub struct ResolverService {
    supervisor: ServiceSupervisor,
    processes: Arc<dyn ProcessControl>,
    tracker: Arc<dyn HitLogTracker>,
    tracked_log: Arc<Mutex<Option<PathBuf>>>,
    config: ResolverConfig,
    stop_wait: RetryPolicy,
    install_wait: RetryPolicy,
}

impl ResolverService {
    /// Creates a controller for the service described by `config`.
    #[must_use]
    pub fn new(
        supervisor: ServiceSupervisor,
        processes: Arc<dyn ProcessControl>,
        tracker: Arc<dyn HitLogTracker>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            supervisor,
            processes,
            tracker,
            tracked_log: Arc::default(),
            config,
            stop_wait: RetryPolicy::new(std::time::Duration::from_millis(300), 100),
            install_wait: RetryPolicy::new(std::time::Duration::from_secs(1), 30),
        }
    }

    /// Overrides the stop and (un)install waits.
    #[must_use]
    pub const fn with_waits(mut self, stop_wait: RetryPolicy, install_wait: RetryPolicy) -> Self {
        self.stop_wait = stop_wait;
        self.install_wait = install_wait;
        self
    }

    /// Service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Whether the service is registered.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        matches!(
            self.supervisor.check_state(&self.config.service_name),
            Ok(ServicePresence::Present)
        )
    }

    /// Whether the service is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running(&self.config.service_name)
    }

    /// Registers the service for demand start if it is not installed yet.
    ///
    /// # Errors
    ///
    /// Fails if the service cannot be registered or a previous registration
    /// is still pending deletion.
    pub async fn install(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.install_blocking()).await?
    }

    /// Stops and removes the service.
    ///
    /// # Errors
    ///
    /// Fails if the service cannot be deleted.
    pub async fn uninstall(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.uninstall_blocking()).await?
    }

    /// Starts the service, configuring the hit log first when `hit_log` is set.
    ///
    /// # Errors
    ///
    /// Fails if the INI file cannot be written or the service does not start.
    pub async fn start(&self, hit_log: bool) -> Result<()> {
        self.start_logging_on(hit_log.then(today)).await
    }

    async fn start_logging_on(&self, log_date: Option<Date>) -> Result<()> {
        if let Some(date) = log_date {
            let path = self.enable_hit_log(date)?;
            self.tracker.start(&path);
            let previous = self
                .tracked_log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(path);
            if let Some(previous) = previous {
                self.tracker.stop(&previous);
            }
        }

        let supervisor = self.supervisor.clone();
        let name = self.config.service_name.clone();
        let started = tokio::task::spawn_blocking(move || supervisor.start_by_name(&name)).await??;
        if started {
            Ok(())
        } else {
            Err(Error::Service {
                name: self.config.service_name.clone(),
                operation: "start",
            })
        }
    }

    /// Stops following the hit log opened by [`start`](Self::start), then
    /// stops the service. Returns `false` if the service did not report
    /// stopped in time.
    ///
    /// # Errors
    ///
    /// Only if the service control manager is unavailable.
    pub async fn stop(&self) -> Result<bool> {
        let tracked = self
            .tracked_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(path) = tracked {
            self.tracker.stop(&path);
        }
        let supervisor = self.supervisor.clone();
        let name = self.config.service_name.clone();
        let wait = self.stop_wait;
        tokio::task::spawn_blocking(move || supervisor.stop(&name, wait)).await?
    }

    /// Log file the resolver writes hits to on `date`.
    #[must_use]
    pub fn hit_log_path(&self, date: Date) -> PathBuf {
        self.config.log_dir.join(hit_log_file_name(date))
    }

    /// Turns on full hit logging into the log for `date`; returns its path.
    ///
    /// # Errors
    ///
    /// Fails if the INI file cannot be read or written.
    pub fn enable_hit_log(&self, date: Date) -> Result<PathBuf> {
        let path = self.hit_log_path(date);
        let file_name = path.display().to_string();
        update_ini(
            &self.config.ini_path,
            GLOBAL_SECTION,
            &[
                ("HitLogFileWhat", "XHCFRU"),
                ("HitLogFullDump", "Yes"),
                ("HitLogMaxPendingHits", "0"),
                ("HitLogFileName", &file_name),
            ],
        )?;
        tracing::info!(log = %path.display(), "Enabled resolver hit log");
        Ok(path)
    }

    /// Turns hit logging off by blanking the log file name.
    ///
    /// # Errors
    ///
    /// Fails if the INI file cannot be read or written.
    pub fn disable_hit_log(&self) -> Result<()> {
        update_ini(&self.config.ini_path, GLOBAL_SECTION, &[("HitLogFileName", "")])?;
        tracing::info!("Disabled resolver hit log");
        Ok(())
    }

    fn install_blocking(&self) -> Result<()> {
        let name = &self.config.service_name;
        match self.supervisor.check_state(name)? {
            ServicePresence::Present => {
                tracing::debug!(service = %name, "Resolver service already installed");
                return Ok(());
            }
            ServicePresence::MarkedForDeletion => {
                tracing::info!(service = %name, "Waiting for previous resolver service to be deleted");
                if !self.wait_for(ServicePresence::Absent) {
                    return Err(Error::Service {
                        name: name.clone(),
                        operation: "install",
                    });
                }
            }
            ServicePresence::Absent => {}
        }

        self.supervisor.register(&ServiceSpec {
            name: name.clone(),
            display_name: self.config.display_name.clone(),
            binary_path: self.config.executable.clone(),
            start_type: StartType::Manual,
        })?;
        if !self.wait_for(ServicePresence::Present) {
            tracing::warn!(service = %name, "Timed out waiting for service installation");
        }
        Ok(())
    }

    fn uninstall_blocking(&self) -> Result<()> {
        let name = &self.config.service_name;
        if self.supervisor.check_state(name)? == ServicePresence::Absent {
            return Ok(());
        }

        if self.processes.count(&self.config.process_name) > 0 {
            if let Err(e) = self.processes.kill_by_name(&self.config.process_name) {
                tracing::warn!(process = %self.config.process_name, error = %e, "Failed to kill resolver process");
            }
        }

        if !self.supervisor.uninstall(name, self.stop_wait)? {
            return Err(Error::Service {
                name: name.clone(),
                operation: "uninstall",
            });
        }
        if !self.wait_for(ServicePresence::Absent) {
            tracing::warn!(service = %name, "Timed out waiting for service removal");
        }
        Ok(())
    }

    fn wait_for(&self, presence: ServicePresence) -> bool {
        self.install_wait.poll_blocking(|| {
            self.supervisor
                .check_state(&self.config.service_name)
                .is_ok_and(|p| p == presence)
        })
    }
}

/// `HitLog-YYYY-MM-DD.log`.
#[must_use]
pub fn hit_log_file_name(date: Date) -> String {
    format!(
        "HitLog-{:04}-{:02}-{:02}.log",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Writes `values` into `section` of the INI file at `path`, creating the
/// file if needed.
///
/// # Errors
///
/// Fails if the file cannot be read or written.
pub fn update_ini(path: &Path, section: &str, values: &[(&str, &str)]) -> Result<()> {
    let mut content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    for (key, value) in values {
        content = set_ini_value(&content, section, key, value);
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Returns `content` with `key=value` set in `section`.
///
/// An existing key is replaced in place, keeping its line ending. A missing
/// key is added after the last non-blank line of the section, and a missing
/// section is appended. Section and key names compare case-insensitively.
#[must_use]
pub fn set_ini_value(content: &str, section: &str, key: &str, value: &str) -> String {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let entry = format!("{key}={value}");

    let mut out = String::with_capacity(content.len() + entry.len() + newline.len());
    let mut in_section = false;
    let mut insert_at = None;
    let mut replaced = false;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let trimmed = body.trim();
        if let Some(name) = section_name(trimmed) {
            in_section = name.eq_ignore_ascii_case(section);
        } else if in_section
            && !replaced
            && key_name(trimmed).is_some_and(|k| k.eq_ignore_ascii_case(key))
        {
            out.push_str(&entry);
            out.push_str(&line[body.len()..]);
            replaced = true;
            continue;
        }
        out.push_str(line);
        if in_section && !trimmed.is_empty() {
            insert_at = Some(out.len());
        }
    }

    if replaced {
        return out;
    }

    match insert_at {
        Some(at) => {
            let addition = if out[..at].ends_with('\n') {
                format!("{entry}{newline}")
            } else {
                format!("{newline}{entry}")
            };
            out.insert_str(at, &addition);
        }
        None => {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push_str(newline);
            }
            out.push_str(&format!("[{section}]{newline}{entry}{newline}"));
        }
    }
    out
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn key_name(line: &str) -> Option<&str> {
    if line.starts_with(';') || line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(key, _)| key.trim())
}

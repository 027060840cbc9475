//! Persistent settings with debounced writes.
//!
//! [`SettingsStore`] is loaded once, synchronously, before anything else runs
//! and is then the single in-memory source of truth. Changes go through
//! [`SettingsStore::update`], which marks the store dirty; a background task
//! coalesces marks arriving within the debounce window into one write.
//! [`SettingsStore::flush_now`] cancels that task and writes immediately.
//!
//! Files are written to a sibling temp file and renamed into place, so a
//! crash mid-write leaves the previous file intact.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default coalescing window for writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// DNS configuration captured before an adapter was redirected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterDnsBackup {
    /// Explicit IPv4 servers.
    pub ipv4_servers: Vec<String>,
    /// Explicit IPv6 servers.
    pub ipv6_servers: Vec<String>,
    /// IPv4 DNS was obtained automatically.
    pub ipv4_auto: bool,
    /// IPv6 DNS was obtained automatically.
    pub ipv6_auto: bool,
}

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    /// Friendly name of the selected adapter.
    pub selected_adapter: Option<String>,
    /// Follow the OS default-route adapter instead of the selection.
    pub auto_switch_adapter: bool,
    /// Resolver hit logging.
    pub resolver_hit_log: bool,
    /// Proxy rule name to enabled flag.
    pub proxy_rules: BTreeMap<String, bool>,
    /// Backups keyed by adapter friendly name.
    pub adapter_backups: BTreeMap<String, AdapterDnsBackup>,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            selected_adapter: None,
            auto_switch_adapter: true,
            resolver_hit_log: false,
            proxy_rules: BTreeMap::new(),
            adapter_backups: BTreeMap::new(),
        }
    }
}

impl PersistedSettings {
    /// The selected adapter, treating a blank name as no selection.
    #[must_use]
    pub fn selected_adapter(&self) -> Option<&str> {
        self.selected_adapter
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Shared handle to the persisted settings.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    debounce: Duration,
    state: RwLock<PersistedSettings>,
    dirty: AtomicBool,
    /// Pending debounce task. Marks and the task's final dirty check both
    /// happen under this lock so no mark is lost.
    pending: Mutex<Option<JoinHandle<()>>>,
    /// Serializes file writes.
    io: Mutex<()>,
}

impl SettingsStore {
    /// Loads settings from `path`.
    ///
    /// A missing file yields defaults. A file that cannot be parsed is logged
    /// and also yields defaults; it is overwritten on the next save.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Settings file is corrupt, using defaults");
                    PersistedSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                PersistedSettings::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read settings, using defaults");
                PersistedSettings::default()
            }
        };
        Self::with_settings(path, settings)
    }

    /// Creates a store holding `settings` without touching the disk.
    #[must_use]
    pub fn with_settings(path: impl Into<PathBuf>, settings: PersistedSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                debounce: DEFAULT_DEBOUNCE,
                state: RwLock::new(settings),
                dirty: AtomicBool::new(false),
                pending: Mutex::new(None),
                io: Mutex::new(()),
            }),
        }
    }

    /// Overrides the debounce window. Only meaningful before the handle is
    /// cloned.
    #[must_use]
    pub fn with_debounce(self, debounce: Duration) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.debounce = debounce;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// A copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> PersistedSettings {
        self.read(Clone::clone)
    }

    /// Runs `f` against the current settings under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&PersistedSettings) -> R) -> R {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Modifies the settings and schedules a write.
    pub fn update<R>(&self, f: impl FnOnce(&mut PersistedSettings) -> R) -> R {
        let result = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.mark_dirty();
        result
    }

    /// Whether changes are waiting to be written.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Schedules a debounced write.
    ///
    /// Outside a tokio runtime the write happens synchronously.
    pub fn mark_dirty(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.dirty.store(true, Ordering::SeqCst);
            if let Err(e) = self.inner.persist() {
                tracing::warn!(path = %self.inner.path.display(), error = %e, "Failed to save settings");
            }
            return;
        };

        let mut pending = lock(&self.inner.pending);
        self.inner.dirty.store(true, Ordering::SeqCst);
        if pending.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *pending = Some(runtime.spawn(async move { inner.debounced_writer().await }));
    }

    /// Cancels any pending debounced write and writes now.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub async fn flush_now(&self) -> Result<()> {
        if let Some(task) = lock(&self.inner.pending).take() {
            task.abort();
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.persist()).await?
    }
}

impl Inner {
    async fn debounced_writer(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.debounce).await;
            let writer = Arc::clone(&self);
            let written = tokio::task::spawn_blocking(move || writer.persist()).await;
            let failed = match written {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to save settings");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Settings writer did not complete");
                    true
                }
            };

            let mut pending = lock(&self.pending);
            if failed {
                self.dirty.store(true, Ordering::SeqCst);
            } else if self.dirty.load(Ordering::SeqCst) {
                continue;
            }
            *pending = None;
            break;
        }
    }

    fn persist(&self) -> Result<()> {
        let _io = lock(&self.io);
        self.dirty.store(false, Ordering::SeqCst);
        let settings = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(e) = write_atomic(&self.path, &settings) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        tracing::debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

fn write_atomic(path: &Path, settings: &PersistedSettings) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Periodic adapter reconciliation.
//!
//! Adapter-change notifications are unreliable across drivers, so the
//! watchdog polls. Each tick compares the OS view of the adapters with the
//! persisted selection:
//!
//! - auto mode: when the default-route adapter differs from the selection,
//!   the orchestrator retargets to it;
//! - manual mode: when a session is active and the selected adapter has
//!   disappeared, the session is stopped.

use crate::adapter::AdapterScope;
use crate::orchestrator::{Outcome, ProxyOrchestrator, StatusObserver};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still running.
    Skipped,
    /// Nothing needed to change.
    Unchanged,
    /// Auto mode, but the OS reported no default-route adapter.
    NoDefaultAdapter,
    /// The selection moved to the default-route adapter.
    Switched {
        /// Previous selection.
        from: Option<String>,
        /// New selection.
        to: String,
    },
    /// The selected adapter vanished and the session was stopped.
    AdapterLost {
        /// The vanished adapter.
        adapter: String,
    },
    /// The orchestrator was busy with another operation.
    Busy,
    /// A step failed; details were logged.
    Failed,
}

/// Polls adapters and keeps the redirection on the right one.
pub struct AdapterWatchdog {
    orchestrator: ProxyOrchestrator,
    observer: Arc<dyn StatusObserver>,
    interval: Duration,
    ticking: AtomicBool,
}

impl AdapterWatchdog {
    /// Creates a watchdog ticking at the configured interval.
    #[must_use]
    pub fn new(orchestrator: ProxyOrchestrator, observer: Arc<dyn StatusObserver>) -> Self {
        let interval = orchestrator.config().watchdog_interval;
        Self {
            orchestrator,
            observer,
            interval,
            ticking: AtomicBool::new(false),
        }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Ticks until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?self.interval, "Adapter watchdog started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    tracing::trace!(?outcome, "Watchdog tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Adapter watchdog stopped");
    }

    /// Runs one reconciliation pass. Overlapping calls are skipped.
    pub async fn tick(&self) -> TickOutcome {
        if self.ticking.swap(true, Ordering::AcqRel) {
            tracing::debug!("Watchdog tick skipped, previous tick still running");
            return TickOutcome::Skipped;
        }
        let _reset = TickGuard(&self.ticking);

        let (auto_switch, selected) = self
            .orchestrator
            .settings()
            .read(|s| (s.auto_switch_adapter, s.selected_adapter().map(str::to_owned)));
        if auto_switch {
            self.follow_default_route(selected).await
        } else {
            self.check_selected(selected).await
        }
    }

    async fn follow_default_route(&self, selected: Option<String>) -> TickOutcome {
        let Some(best) = self.orchestrator.default_adapter().await else {
            return TickOutcome::NoDefaultAdapter;
        };
        if best.friendly_name.is_empty() || selected.as_deref() == Some(best.friendly_name.as_str()) {
            return TickOutcome::Unchanged;
        }

        tracing::info!(
            from = selected.as_deref().unwrap_or("<none>"),
            to = %best.friendly_name,
            "Default adapter changed"
        );
        match self.orchestrator.retarget(&best, self.observer.as_ref()).await {
            Ok(Outcome::Completed) => TickOutcome::Switched {
                from: selected,
                to: best.friendly_name,
            },
            Ok(Outcome::Busy) => TickOutcome::Busy,
            Err(e) => {
                tracing::error!(adapter = %best.friendly_name, error = %e, "Adapter switch failed");
                TickOutcome::Failed
            }
        }
    }

    async fn check_selected(&self, selected: Option<String>) -> TickOutcome {
        let Some(name) = selected else {
            return TickOutcome::Unchanged;
        };
        if !self.orchestrator.runtime_state().await.is_active() {
            return TickOutcome::Unchanged;
        }

        match self.orchestrator.list_adapters(AdapterScope::All).await {
            Ok(adapters) if adapters.iter().any(|a| a.friendly_name == name) => {
                return TickOutcome::Unchanged;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list adapters");
                return TickOutcome::Failed;
            }
        }

        tracing::warn!(adapter = %name, "Selected adapter disappeared, stopping");
        match self.orchestrator.stop(self.observer.as_ref()).await {
            Ok(Outcome::Busy) => return TickOutcome::Busy,
            Ok(Outcome::Completed) => {}
            Err(e) => tracing::error!(error = %e, "Stop after adapter loss was incomplete"),
        }
        self.observer.adapter_lost(&name);
        TickOutcome::AdapterLost { adapter: name }
    }
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

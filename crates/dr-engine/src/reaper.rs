//! Stale engine process reaping.
//!
//! Office engines occasionally leave helper processes behind (a detached
//! `soffice.bin` that outlives its launcher, for instance). Those hold file
//! handles on artifacts and pile up over time. [`ProcessReaper`] finds engine
//! processes older than a grace period and terminates them.
//!
//! Process introspection is abstracted behind [`ProcessTable`]. Whenever the
//! table cannot list processes with their ages, the reaper falls back to a
//! broad terminate-by-name sweep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dr_core::events::{EventBus, EventPayload};

/// A running process as seen by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub age: Duration,
}

/// Platform process introspection.
pub trait ProcessTable: Send + Sync {
    /// Every visible process. Any error means fine-grained introspection is
    /// unavailable and the caller falls back to
    /// [`ProcessTable::terminate_by_name`].
    fn list(&self) -> std::io::Result<Vec<ProcessInfo>>;

    fn terminate(&self, pid: u32) -> std::io::Result<()>;

    /// Terminate every process called `name`, regardless of age. Returns the
    /// number of processes signalled.
    fn terminate_by_name(&self, name: &str) -> std::io::Result<usize>;
}

/// Kernel-backed process table using `sysinfo`.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn unsupported() -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process introspection is not supported on this platform",
        )
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&self) -> std::io::Result<Vec<ProcessInfo>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(Self::unsupported());
        }

        let mut system = self.system.lock();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
        if system.processes().is_empty() {
            // hidepid or an unmounted /proc leave us blind rather than failing.
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "no processes visible",
            ));
        }

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                age: Duration::from_secs(process.run_time()),
            })
            .collect())
    }

    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new(),
        );

        let process = system.process(pid).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no process {pid}"))
        })?;
        // `None` means SIGKILL does not exist here; `kill()` picks the native way.
        let killed = process.kill_with(Signal::Kill).unwrap_or_else(|| process.kill());
        if killed {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("failed to kill process {pid}")))
        }
    }

    fn terminate_by_name(&self, name: &str) -> std::io::Result<usize> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(Self::unsupported());
        }

        let mut system = self.system.lock();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

        let own_pid = std::process::id();
        let names = [name.to_string()];
        Ok(system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .filter(|(_, process)| matches_name(&process.name().to_string_lossy(), &names))
            .filter(|(_, process)| process.kill_with(Signal::Kill).unwrap_or_else(|| process.kill()))
            .count())
    }
}

/// Kernel process names are truncated to 15 bytes on Linux.
const COMM_LEN: usize = 15;

fn matches_name(process: &str, names: &[String]) -> bool {
    names.iter().any(|name| {
        process.eq_ignore_ascii_case(name)
            || (process.len() == COMM_LEN
                && name.len() > COMM_LEN
                && name.get(..COMM_LEN).is_some_and(|p| p.eq_ignore_ascii_case(process)))
    })
}

/// Finds and terminates engine processes older than a grace period.
pub struct ProcessReaper {
    table: Arc<dyn ProcessTable>,
    names: Vec<String>,
    grace: Duration,
    events: Option<Arc<EventBus>>,
}

impl ProcessReaper {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        names: impl IntoIterator<Item = impl Into<String>>,
        grace: Duration,
    ) -> Self {
        Self {
            table,
            names: names.into_iter().map(Into::into).collect(),
            grace,
            events: None,
        }
    }

    /// Publish a `ProcessesReaped` event after sweeps that killed anything.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Terminate matching processes older than the grace period. Returns how
    /// many were terminated. Never fails; problems are logged.
    ///
    /// Blocking: call from a blocking context or via [`Self::sweep_async`].
    pub fn sweep(&self) -> usize {
        let own_pid = std::process::id();

        let count = match self.table.list() {
            Ok(processes) => processes
                .into_iter()
                .filter(|p| p.pid != own_pid)
                .filter(|p| matches_name(&p.name, &self.names))
                .filter(|p| p.age >= self.grace)
                .filter(|p| match self.table.terminate(p.pid) {
                    Ok(()) => {
                        tracing::info!(
                            pid = p.pid,
                            name = %p.name,
                            age_secs = p.age.as_secs(),
                            "Terminated stale engine process"
                        );
                        true
                    }
                    Err(e) => {
                        tracing::warn!(pid = p.pid, name = %p.name, error = %e, "Failed to terminate process");
                        false
                    }
                })
                .count(),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::Unsupported {
                    tracing::debug!("Process listing unsupported, sweeping by name");
                } else {
                    tracing::warn!(error = %e, "Process listing failed, sweeping by name");
                }
                self.names
                    .iter()
                    .map(|name| match self.table.terminate_by_name(name) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(name = %name, error = %e, "Name-based sweep failed");
                            0
                        }
                    })
                    .sum()
            }
        };

        if count > 0 {
            if let Some(events) = &self.events {
                events.broadcast(EventPayload::ProcessesReaped { count });
            }
        }
        count
    }

    /// [`Self::sweep`] on the blocking thread pool.
    pub async fn sweep_async(self: &Arc<Self>) -> usize {
        let reaper = Arc::clone(self);
        tokio::task::spawn_blocking(move || reaper.sweep())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Reaper sweep task panicked");
                0
            })
    }
}

/// Shortest period between periodic sweeps.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Run [`ProcessReaper::sweep`] every `interval` (at least
/// [`MIN_SWEEP_INTERVAL`]) until `cancel` fires.
pub fn spawn_periodic_sweep(
    reaper: Arc<ProcessReaper>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    if interval < MIN_SWEEP_INTERVAL {
        tracing::warn!(
            requested_ms = interval.as_millis() as u64,
            "Reaper interval too short, using {}s",
            MIN_SWEEP_INTERVAL.as_secs()
        );
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);

    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Process reaper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Process reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let count = reaper.sweep_async().await;
                    if count > 0 {
                        tracing::info!(count, "Periodic reaper sweep terminated processes");
                    }
                }
            }
        }
    })
}

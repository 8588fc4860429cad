//! # dr-engine
//!
//! Everything that touches external conversion-engine processes.
//!
//! This crate provides:
//!
//! - **Command execution** ([`EngineCommand`]) -- async builder that runs a
//!   process in its own process group with a hard timeout, escalating from
//!   SIGTERM to SIGKILL when the deadline passes.
//! - **Engines** ([`ConversionEngine`], [`LibreOfficeEngine`],
//!   [`NativeOfficeEngine`]) -- the two interchangeable conversion strategies.
//! - **Invocation** ([`Invoker`]) -- one supervised engine run plus output
//!   verification.
//! - **Availability** ([`EngineProber`]) -- cached, time-bounded liveness checks.
//! - **Reaping** ([`ProcessReaper`]) -- terminates stale engine processes that
//!   escaped a timeout.
//! - **Artifacts** ([`ArtifactStore`]) -- per-key input/output paths.
//! - **Orchestration** ([`Orchestrator`]) -- priority order with fallback.

pub mod artifacts;
pub mod command;
pub mod engine;
pub mod invoker;
pub mod orchestrator;
pub mod prober;
pub mod reaper;

// ---- Re-exports for convenience ----

pub use artifacts::{ArtifactPaths, ArtifactStore};
pub use command::{CommandError, CommandOutput, EngineCommand};
pub use engine::{
    default_engines, ConversionEngine, EngineKind, LibreOfficeEngine, NativeOfficeEngine,
    PreparedCommand,
};
pub use invoker::Invoker;
pub use orchestrator::{AttemptResult, ConversionOutcome, EngineAttempt, Orchestrator};
pub use prober::{Availability, EngineAvailability, EngineProber};
pub use reaper::{spawn_periodic_sweep, ProcessInfo, ProcessReaper, ProcessTable, SystemProcessTable};

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable `sh` script and return its path.
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

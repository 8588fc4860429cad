//! Conversion engine strategies.
//!
//! Two engines are supported: LibreOffice in headless mode and a native
//! office converter. Both expose the same [`ConversionEngine`] capability so
//! the orchestrator can try them in priority order without knowing which
//! one it is driving.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dr_core::config::EnginesConfig;
use dr_core::{Error, Result};

use crate::command::EngineCommand;

/// Identifies one of the supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    LibreOffice,
    NativeOffice,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::LibreOffice => "libreoffice",
            EngineKind::NativeOffice => "native-office",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command ready to run, plus any scratch state that must outlive it.
///
/// The scratch directory (if any) is removed when this value is dropped.
#[derive(Debug)]
pub struct PreparedCommand {
    pub command: EngineCommand,
    pub scratch: Option<tempfile::TempDir>,
}

impl PreparedCommand {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            scratch: None,
        }
    }
}

/// One interchangeable conversion strategy.
///
/// Implementations only describe *how* to call the engine; supervision,
/// timeouts and output verification live in [`crate::Invoker`].
pub trait ConversionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Resolved executable, or `None` when the engine is not installed.
    fn executable(&self) -> Option<&Path>;

    /// Process names this engine leaves behind, for the reaper.
    fn process_names(&self) -> &[&'static str];

    /// Command that answers quickly when the engine is usable.
    fn probe_command(&self) -> Option<EngineCommand> {
        let exe = self.executable()?;
        let mut cmd = EngineCommand::new(exe);
        cmd.arg("--version");
        Some(cmd)
    }

    /// Build the command converting `input` into exactly `output`.
    fn convert_command(&self, input: &Path, output: &Path) -> Result<PreparedCommand>;
}

/// Resolve an executable: the configured path if it exists, else the first
/// of `candidates` found on `PATH`.
pub(crate) fn resolve_executable(configured: Option<&Path>, candidates: &[&str]) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured engine path does not exist, searching PATH");
    }
    candidates.iter().find_map(|name| which::which(name).ok())
}

// ---------------------------------------------------------------------------
// LibreOffice
// ---------------------------------------------------------------------------

/// LibreOffice (`soffice`) in headless mode.
///
/// Every invocation gets a throwaway user profile so that concurrent runs
/// never contend for the shared profile lock.
#[derive(Debug, Clone)]
pub struct LibreOfficeEngine {
    executable: Option<PathBuf>,
}

impl LibreOfficeEngine {
    const CANDIDATES: &'static [&'static str] = &["soffice", "libreoffice"];
    const PROCESS_NAMES: &'static [&'static str] = &["soffice", "soffice.bin", "oosplash"];

    /// Locate the executable from an explicit path or `PATH`.
    pub fn discover(configured: Option<&Path>) -> Self {
        Self {
            executable: resolve_executable(configured, Self::CANDIDATES),
        }
    }

    /// Use a specific executable without any lookup.
    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }
}

impl ConversionEngine for LibreOfficeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::LibreOffice
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn process_names(&self) -> &[&'static str] {
        Self::PROCESS_NAMES
    }

    fn convert_command(&self, input: &Path, output: &Path) -> Result<PreparedCommand> {
        let exe = self.executable().ok_or_else(|| Error::EngineUnavailable {
            engine: self.name().to_string(),
        })?;

        // soffice names its output after the input stem inside --outdir.
        let outdir = output
            .parent()
            .ok_or_else(|| Error::conversion_failure(self.name(), "output path has no parent"))?;
        if input.file_stem() != output.file_stem() {
            return Err(Error::conversion_failure(
                self.name(),
                "input and output must share a file stem",
            ));
        }

        let profile = tempfile::Builder::new()
            .prefix("docrelay-lo-")
            .tempdir()
            .map_err(|e| Error::conversion_failure(self.name(), format!("profile dir: {e}")))?;

        let mut cmd = EngineCommand::new(exe);
        cmd.arg(format!(
            "-env:UserInstallation=file://{}",
            profile.path().display()
        ))
        .args([
            "--headless",
            "--nologo",
            "--norestore",
            "--nodefault",
            "--nolockcheck",
            "--convert-to",
            "pdf",
            "--outdir",
        ])
        .arg(outdir.to_string_lossy())
        .arg(input.to_string_lossy())
        .env("HOME", profile.path().to_string_lossy());

        Ok(PreparedCommand {
            command: cmd,
            scratch: Some(profile),
        })
    }
}

// ---------------------------------------------------------------------------
// Native office converter
// ---------------------------------------------------------------------------

/// A host-native converter called as `<exe> <input> <output>`.
#[derive(Debug, Clone)]
pub struct NativeOfficeEngine {
    executable: Option<PathBuf>,
}

impl NativeOfficeEngine {
    const CANDIDATES: &'static [&'static str] = &["docx2pdf"];
    const PROCESS_NAMES: &'static [&'static str] = &["docx2pdf", "winword", "WINWORD.EXE"];

    pub fn discover(configured: Option<&Path>) -> Self {
        Self {
            executable: resolve_executable(configured, Self::CANDIDATES),
        }
    }

    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }
}

impl ConversionEngine for NativeOfficeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::NativeOffice
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn process_names(&self) -> &[&'static str] {
        Self::PROCESS_NAMES
    }

    fn convert_command(&self, input: &Path, output: &Path) -> Result<PreparedCommand> {
        let exe = self.executable().ok_or_else(|| Error::EngineUnavailable {
            engine: self.name().to_string(),
        })?;
        let mut cmd = EngineCommand::new(exe);
        cmd.arg(input.to_string_lossy()).arg(output.to_string_lossy());
        Ok(PreparedCommand::new(cmd))
    }
}

/// The default engine list in priority order: LibreOffice first.
pub fn default_engines(config: &EnginesConfig) -> Vec<Arc<dyn ConversionEngine>> {
    vec![
        Arc::new(LibreOfficeEngine::discover(config.libreoffice_path.as_deref())),
        Arc::new(NativeOfficeEngine::discover(config.native_office_path.as_deref())),
    ]
}

//! Local artifact paths keyed by target key.
//!
//! A job for key `K` writes its input to `<dir>/K.docx` (or `.doc`) and its
//! output to `<dir>/K.pdf`. Keys are sanitised at admission, so joining them
//! onto the storage directory cannot escape it.

use std::path::{Path, PathBuf};

use dr_core::{DocumentKind, Error, Result, TargetKey};

/// Input and output locations for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Every file a previous job for the same key could have left behind.
    pub stale: Vec<PathBuf>,
}

/// The storage directory for input and output artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the storage directory if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))
    }

    pub fn paths(&self, key: &TargetKey, kind: DocumentKind) -> ArtifactPaths {
        let key = key.as_str();
        let stale = [DocumentKind::Docx, DocumentKind::Doc]
            .iter()
            .map(|k| self.dir.join(format!("{key}.{}", k.extension())))
            .chain(std::iter::once(self.dir.join(format!("{key}.pdf"))))
            .collect();

        ArtifactPaths {
            input: self.dir.join(format!("{key}.{}", kind.extension())),
            output: self.dir.join(format!("{key}.pdf")),
            stale,
        }
    }

    /// Remove leftovers from earlier jobs with the same key. Missing files
    /// are fine; anything else is reported with the offending path.
    pub async fn remove_stale(&self, paths: &ArtifactPaths) -> Result<()> {
        for path in &paths.stale {
            remove_if_exists(path)
                .await
                .map_err(|e| Error::storage(path, e))?;
        }
        Ok(())
    }

    pub async fn write_input(&self, paths: &ArtifactPaths, payload: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::storage(&self.dir, e))?;
        tokio::fs::write(&paths.input, payload)
            .await
            .map_err(|e| Error::storage(&paths.input, e))
    }

    /// Delete the job's input and output. Returns the paths that could not be
    /// removed.
    pub async fn cleanup(&self, paths: &ArtifactPaths) -> Vec<(PathBuf, std::io::Error)> {
        let mut failures = Vec::new();
        for path in [&paths.input, &paths.output] {
            if let Err(e) = remove_if_exists(path).await {
                failures.push((path.clone(), e));
            }
        }
        failures
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

//! Supervised single-engine invocation.

use std::path::Path;
use std::time::Duration;

use dr_core::config::EnginesConfig;
use dr_core::{Error, Result};

use crate::command::CommandError;
use crate::engine::ConversionEngine;

/// Outputs above this size are delivered but logged, since some receivers
/// cap upload size.
pub const LARGE_OUTPUT_WARN_BYTES: u64 = 5 * 1024 * 1024;

/// Runs one engine against one input under a hard timeout and checks that a
/// plausible PDF came out.
#[derive(Debug, Clone)]
pub struct Invoker {
    timeout: Duration,
    kill_grace: Duration,
    min_output_bytes: u64,
}

impl Invoker {
    pub fn new(timeout: Duration, kill_grace: Duration, min_output_bytes: u64) -> Self {
        Self {
            timeout,
            kill_grace,
            min_output_bytes,
        }
    }

    pub fn from_config(config: &EnginesConfig) -> Self {
        Self::new(
            config.convert_timeout(),
            config.kill_grace(),
            config.min_output_bytes,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Convert `input` to `output` with `engine`, returning the output size.
    ///
    /// Returns within the configured timeout plus the kill grace windows.
    /// A timed-out engine is always terminated before this returns.
    pub async fn invoke(
        &self,
        engine: &dyn ConversionEngine,
        input: &Path,
        output: &Path,
    ) -> Result<u64> {
        let name = engine.name();
        let mut prepared = engine.convert_command(input, output)?;
        prepared
            .command
            .timeout(self.timeout)
            .kill_grace(self.kill_grace);

        let started = std::time::Instant::now();
        let result = prepared.command.execute().await;
        // Profile directories go away only once the engine is dead.
        drop(prepared.scratch);

        match result {
            Ok(_) => {}
            Err(CommandError::TimedOut { after, .. }) => {
                return Err(Error::ConversionTimeout {
                    engine: name.to_string(),
                    after,
                });
            }
            Err(CommandError::Spawn { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Err(Error::EngineUnavailable {
                    engine: name.to_string(),
                });
            }
            Err(e) => return Err(Error::conversion_failure(name, e.to_string())),
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(Error::conversion_failure(
                    name,
                    "engine exited cleanly but produced no output",
                ));
            }
        };

        if size < self.min_output_bytes {
            return Err(Error::conversion_failure(
                name,
                format!(
                    "output is only {size} bytes (minimum {})",
                    self.min_output_bytes
                ),
            ));
        }

        if size > LARGE_OUTPUT_WARN_BYTES {
            tracing::warn!(
                engine = name,
                output_bytes = size,
                "Converted output is unusually large"
            );
        }

        tracing::debug!(
            engine = name,
            output_bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Engine produced output"
        );

        Ok(size)
    }
}

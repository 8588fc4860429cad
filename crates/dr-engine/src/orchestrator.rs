//! Priority-ordered conversion with fallback.
//!
//! Engines are tried in order. An unavailable engine is skipped; a failed or
//! timed-out engine falls through to the next one. Each engine gets at most
//! one attempt per job, so a job's total conversion time is bounded by the
//! sum of the per-engine budgets.

use std::sync::Arc;

use serde::Serialize;

use dr_core::events::{EventBus, EventPayload};
use dr_core::{DocumentKind, JobId, Result, TargetKey};

use crate::artifacts::{remove_if_exists, ArtifactPaths, ArtifactStore};
use crate::engine::{ConversionEngine, EngineKind};
use crate::invoker::Invoker;
use crate::prober::EngineProber;
use crate::reaper::ProcessReaper;

/// What happened when one engine was considered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Unavailable,
    Succeeded { output_bytes: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineAttempt {
    pub engine: EngineKind,
    #[serde(flatten)]
    pub result: AttemptResult,
}

/// The result of running a job through the engine chain.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub success: bool,
    pub engine_used: Option<EngineKind>,
    pub output_bytes: u64,
    pub attempts: Vec<EngineAttempt>,
    /// Per-engine failures joined with `"; "`, when unsuccessful.
    pub error: Option<String>,
}

impl ConversionOutcome {
    fn from_attempts(attempts: Vec<EngineAttempt>) -> Self {
        let succeeded = attempts.iter().find_map(|a| match a.result {
            AttemptResult::Succeeded { output_bytes } => Some((a.engine, output_bytes)),
            _ => None,
        });

        match succeeded {
            Some((engine, output_bytes)) => Self {
                success: true,
                engine_used: Some(engine),
                output_bytes,
                attempts,
                error: None,
            },
            None => {
                let error = if attempts.is_empty() {
                    "no conversion engines configured".to_string()
                } else {
                    attempts
                        .iter()
                        .filter_map(|a| match &a.result {
                            AttemptResult::Unavailable => {
                                Some(format!("{}: engine unavailable", a.engine))
                            }
                            AttemptResult::Failed { error } => Some(error.clone()),
                            AttemptResult::Succeeded { .. } => None,
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                };
                Self {
                    success: false,
                    engine_used: None,
                    output_bytes: 0,
                    attempts,
                    error: Some(error),
                }
            }
        }
    }

    /// Whether any engine actually ran and failed (as opposed to every
    /// engine being unavailable).
    pub fn any_engine_failed(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| matches!(a.result, AttemptResult::Failed { .. }))
    }
}

/// Drives artifact preparation and the engine chain for one job at a time.
pub struct Orchestrator {
    engines: Vec<Arc<dyn ConversionEngine>>,
    prober: Arc<EngineProber>,
    invoker: Invoker,
    reaper: Arc<ProcessReaper>,
    store: ArtifactStore,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        engines: Vec<Arc<dyn ConversionEngine>>,
        prober: Arc<EngineProber>,
        invoker: Invoker,
        reaper: Arc<ProcessReaper>,
        store: ArtifactStore,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            engines,
            prober,
            invoker,
            reaper,
            store,
            events,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn prober(&self) -> &Arc<EngineProber> {
        &self.prober
    }

    pub fn reaper(&self) -> &Arc<ProcessReaper> {
        &self.reaper
    }

    /// Clear stale artifacts for `key` and write the new input.
    ///
    /// When a stale file cannot be removed (typically held open by a
    /// lingering engine), one reaper sweep runs before a single retry.
    pub async fn prepare(
        &self,
        key: &TargetKey,
        kind: DocumentKind,
        payload: &[u8],
    ) -> Result<ArtifactPaths> {
        let paths = self.store.paths(key, kind);

        if let Err(first) = self.store.remove_stale(&paths).await {
            tracing::warn!(target_key = %key, error = %first, "Stale artifact removal failed, reaping and retrying");
            let reaped = self.reaper.sweep_async().await;
            tracing::debug!(reaped, "Reaper sweep before retry");
            self.store.remove_stale(&paths).await?;
        }

        self.store.write_input(&paths, payload).await?;
        Ok(paths)
    }

    /// Run the engine chain for prepared artifacts.
    pub async fn convert(&self, job_id: JobId, paths: &ArtifactPaths) -> ConversionOutcome {
        let availability = self.prober.availability().await;
        let mut attempts = Vec::with_capacity(self.engines.len());

        for engine in &self.engines {
            let kind = engine.kind();

            if !availability.is_available(kind) {
                tracing::info!(job_id = %job_id, engine = %kind, "Skipping unavailable engine");
                self.publish(job_id, kind, false, "engine unavailable");
                attempts.push(EngineAttempt {
                    engine: kind,
                    result: AttemptResult::Unavailable,
                });
                continue;
            }

            // A partial file from a previous engine must not pass verification.
            if let Err(e) = remove_if_exists(&paths.output).await {
                tracing::warn!(job_id = %job_id, error = %e, "Could not clear output before attempt");
            }

            tracing::info!(job_id = %job_id, engine = %kind, "Invoking engine");
            match self
                .invoker
                .invoke(engine.as_ref(), &paths.input, &paths.output)
                .await
            {
                Ok(output_bytes) => {
                    tracing::info!(job_id = %job_id, engine = %kind, output_bytes, "Conversion succeeded");
                    self.publish(job_id, kind, true, &format!("{output_bytes} bytes"));
                    attempts.push(EngineAttempt {
                        engine: kind,
                        result: AttemptResult::Succeeded { output_bytes },
                    });
                    break;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, engine = %kind, error = %e, "Engine attempt failed");
                    self.publish(job_id, kind, false, &e.to_string());
                    if matches!(e, dr_core::Error::EngineUnavailable { .. }) {
                        self.prober.invalidate();
                    }
                    attempts.push(EngineAttempt {
                        engine: kind,
                        result: AttemptResult::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        ConversionOutcome::from_attempts(attempts)
    }

    fn publish(&self, job_id: JobId, engine: EngineKind, succeeded: bool, detail: &str) {
        self.events.broadcast(EventPayload::EngineAttempt {
            job_id,
            engine: engine.name().to_string(),
            succeeded,
            detail: detail.to_string(),
        });
    }
}

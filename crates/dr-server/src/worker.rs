//! Fixed-size worker pool.
//!
//! `K` identical tasks each loop: dequeue, mark `Processing`, convert,
//! deliver, record the terminal state. Each job runs in its own spawned task,
//! so even a panic becomes a `Failed` record instead of a dead worker.
//! Cancellation only stops idle workers; a dequeued job always runs to a
//! terminal state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dr_core::events::EventPayload;
use dr_core::{Error, JobResult, Result, Transition};

use crate::context::AppContext;
use crate::queue::QueuedJob;

/// Counts workers currently executing a job.
#[derive(Debug)]
pub struct WorkerStats {
    running: AtomicUsize,
    max: usize,
}

impl WorkerStats {
    pub fn new(max: usize) -> Self {
        Self {
            running: AtomicUsize::new(0),
            max,
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Mark one worker busy until the guard drops.
    pub fn begin(self: &Arc<Self>) -> BusyGuard {
        self.running.fetch_add(1, Ordering::Relaxed);
        BusyGuard(Arc::clone(self))
    }
}

pub struct BusyGuard(Arc<WorkerStats>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Spawn `config.workers.count` workers.
pub fn spawn_workers(ctx: &AppContext, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    (0..ctx.workers.max())
        .map(|worker_id| {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_worker(ctx, worker_id, cancel))
        })
        .collect()
}

async fn run_worker(ctx: AppContext, worker_id: usize, cancel: CancellationToken) {
    tracing::info!(worker = worker_id, "Worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = ctx.queue.dequeue() => job,
        };

        let _busy = ctx.workers.begin();
        process_job(&ctx, worker_id, job).await;
    }

    tracing::info!(worker = worker_id, "Worker stopped");
}

/// Drive one job from `Queued` to a terminal state. Never fails.
pub async fn process_job(ctx: &AppContext, worker_id: usize, job: QueuedJob) {
    let job_id = job.id;

    if let Err(e) = ctx
        .status
        .transition(job_id, Transition::Start { worker_id })
    {
        tracing::error!(job_id = %job_id, error = %e, "Refusing to start job");
        return;
    }
    tracing::info!(job_id = %job_id, worker = worker_id, target_key = %job.target_key, "Processing job");
    ctx.event_bus
        .broadcast(EventPayload::JobStarted { job_id, worker_id });

    let task_ctx = ctx.clone();
    let result = match tokio::spawn(async move { execute(&task_ctx, job).await }).await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("job task aborted: {e}"))),
    };

    match result {
        Ok(result) => {
            let files_cleaned = result.files_cleaned;
            match ctx.status.transition(job_id, Transition::Complete(result)) {
                Ok(_) => {
                    tracing::info!(job_id = %job_id, files_cleaned, "Job completed");
                    ctx.event_bus.broadcast(EventPayload::JobCompleted {
                        job_id,
                        files_cleaned,
                    });
                }
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record completion"),
            }
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(job_id = %job_id, error = %message, "Job failed");
            if let Err(te) = ctx.status.transition(job_id, Transition::Fail(message.clone())) {
                tracing::error!(job_id = %job_id, error = %te, "Failed to record failure");
            }
            ctx.event_bus.broadcast(EventPayload::JobFailed {
                job_id,
                error: message,
            });

            if matches!(e, Error::Conversion(_)) && ctx.config.reaper.enabled {
                let reaper = ctx.orchestrator.reaper().clone();
                tokio::spawn(async move {
                    let count = reaper.sweep_async().await;
                    if count > 0 {
                        tracing::info!(count, "Reaped stale engine processes after failure");
                    }
                });
            }
        }
    }
}

async fn execute(ctx: &AppContext, job: QueuedJob) -> Result<JobResult> {
    let orchestrator = &ctx.orchestrator;
    let _key = ctx.locks.acquire(job.target_key.as_str()).await;

    let paths = orchestrator
        .prepare(&job.target_key, job.document_kind, &job.payload)
        .await?;

    let outcome = orchestrator.convert(job.id, &paths).await;
    if !outcome.success {
        return Err(Error::Conversion(outcome.error.unwrap_or_default()));
    }
    let engine_used = outcome
        .engine_used
        .map(|e| e.name().to_string())
        .unwrap_or_default();

    let delivery = ctx
        .delivery
        .deliver(job.id, &paths.output, &job.callback)
        .await;
    if !delivery.is_success() {
        return Err(Error::Delivery {
            attempts: delivery.attempts,
            message: delivery.failure_message(),
        });
    }

    let files_cleaned = if delivery.is_confirmed() {
        let failures = orchestrator.store().cleanup(&paths).await;
        for (path, e) in &failures {
            tracing::warn!(job_id = %job.id, path = %path.display(), error = %e, "Could not remove artifact");
        }
        failures.is_empty()
    } else {
        tracing::warn!(
            job_id = %job.id,
            marker = %ctx.config.delivery.success_marker,
            "Callback succeeded without success marker, keeping artifacts"
        );
        false
    };

    Ok(JobResult {
        engine_used,
        output_bytes: outcome.output_bytes,
        callback_url: delivery.url,
        callback_status: delivery.status.unwrap_or_default(),
        callback_response: delivery.body,
        delivery_attempts: delivery.attempts,
        files_cleaned,
    })
}

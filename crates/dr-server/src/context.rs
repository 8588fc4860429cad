//! Service-oriented application context.
//!
//! [`AppContext`] owns every piece of shared runtime state (queue, status
//! table, key locks, worker counters) plus the long-lived services built from
//! configuration (orchestrator, delivery client, event bus). It is constructed
//! once at startup, cloned cheaply into handlers and workers, and never
//! re-initialised.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use dr_core::config::Config;
use dr_core::events::EventBus;
use dr_core::JobSummary;
use dr_engine::{
    default_engines, ArtifactStore, ConversionEngine, EngineProber, Invoker, Orchestrator,
    ProcessReaper, ProcessTable, SystemProcessTable,
};

use crate::delivery::DeliveryClient;
use crate::locks::KeyLocks;
use crate::queue::JobQueue;
use crate::status::{StatusCounts, StatusTable};
use crate::worker::WorkerStats;

/// Shared application state passed to every handler and worker.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub queue: Arc<JobQueue>,
    pub status: Arc<StatusTable>,
    pub locks: Arc<KeyLocks>,
    pub orchestrator: Arc<Orchestrator>,
    pub delivery: Arc<DeliveryClient>,
    pub event_bus: Arc<EventBus>,
    pub workers: Arc<WorkerStats>,
}

/// Response of the inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub queue_depth: usize,
    pub workers_running: usize,
    pub workers_max: usize,
    pub status_counts: StatusCounts,
    pub recent_jobs: Vec<JobSummary>,
}

/// Response of the liveness surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `"ok"` when at least one engine is usable, otherwise `"degraded"`.
    pub status: &'static str,
    pub engine_availability: BTreeMap<String, bool>,
    pub workers_running: usize,
    pub workers_max: usize,
    pub queue_depth: usize,
}

impl AppContext {
    /// Build the context with the installed engines and the kernel process
    /// table.
    pub fn new(config: Config) -> Self {
        let engines = default_engines(&config.engines);
        Self::with_engines(config, engines, Arc::new(SystemProcessTable::new()))
    }

    /// Build the context with explicit engines and process table.
    pub fn with_engines(
        config: Config,
        engines: Vec<Arc<dyn ConversionEngine>>,
        process_table: Arc<dyn ProcessTable>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());

        let prober = Arc::new(EngineProber::new(
            engines.clone(),
            config.engines.probe_timeout(),
            config.engines.probe_cache(),
        ));

        let process_names: BTreeSet<String> = engines
            .iter()
            .flat_map(|e| e.process_names().iter().map(|n| n.to_string()))
            .collect();
        let reaper = Arc::new(
            ProcessReaper::new(process_table, process_names, config.reaper.grace())
                .with_events(event_bus.clone()),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            engines,
            prober,
            Invoker::from_config(&config.engines),
            reaper,
            ArtifactStore::new(&config.storage.local_dir),
            event_bus.clone(),
        ));

        let delivery = Arc::new(DeliveryClient::new(
            config.delivery.clone(),
            event_bus.clone(),
        ));

        Self {
            workers: Arc::new(WorkerStats::new(config.workers.count)),
            config: Arc::new(config),
            queue: Arc::new(JobQueue::new()),
            status: Arc::new(StatusTable::new()),
            locks: Arc::new(KeyLocks::new()),
            orchestrator,
            delivery,
            event_bus,
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            queue_depth: self.queue.size(),
            workers_running: self.workers.running(),
            workers_max: self.workers.max(),
            status_counts: self.status.counts(),
            recent_jobs: self.status.recent(self.config.status.recent_window),
        }
    }

    pub async fn health_report(&self) -> HealthReport {
        let availability = self.orchestrator.prober().availability().await;
        HealthReport {
            status: if availability.any_available() {
                "ok"
            } else {
                "degraded"
            },
            engine_availability: availability.to_map(),
            workers_running: self.workers.running(),
            workers_max: self.workers.max(),
            queue_depth: self.queue.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EmptyProcessTable;
    use dr_engine::{LibreOfficeEngine, NativeOfficeEngine};

    #[test]
    fn reaper_names_are_unique_across_engines() {
        let engines: Vec<Arc<dyn ConversionEngine>> = vec![
            Arc::new(LibreOfficeEngine::with_executable("/nonexistent/soffice")),
            Arc::new(NativeOfficeEngine::with_executable("/nonexistent/docx2pdf")),
            Arc::new(LibreOfficeEngine::with_executable("/opt/other/soffice")),
        ];
        let ctx = AppContext::with_engines(Config::default(), engines, Arc::new(EmptyProcessTable));

        let names = ctx.orchestrator.reaper().names();
        assert_eq!(
            names,
            ["WINWORD.EXE", "docx2pdf", "oosplash", "soffice", "soffice.bin", "winword"]
        );
    }
}

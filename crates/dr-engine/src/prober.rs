//! Engine availability probing with a short-lived cache.
//!
//! Probes run the engine's version command under a small timeout. Any error
//! (missing executable, non-zero exit, timeout) means "unavailable"; probing
//! itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::{ConversionEngine, EngineKind};

/// Result of probing a single engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineAvailability {
    pub engine: EngineKind,
    pub available: bool,
    pub probed_at: DateTime<Utc>,
}

/// A snapshot of every engine's availability, in priority order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Availability(pub Vec<EngineAvailability>);

impl Availability {
    pub fn is_available(&self, kind: EngineKind) -> bool {
        self.0.iter().any(|a| a.engine == kind && a.available)
    }

    /// Engine name to availability, as reported by the health endpoint.
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.0
            .iter()
            .map(|a| (a.engine.name().to_string(), a.available))
            .collect()
    }

    pub fn any_available(&self) -> bool {
        self.0.iter().any(|a| a.available)
    }
}

struct Cached {
    at: Instant,
    snapshot: Availability,
}

/// Probes engines and caches the answer for `cache_window`.
pub struct EngineProber {
    engines: Vec<Arc<dyn ConversionEngine>>,
    timeout: Duration,
    cache_window: Duration,
    cache: Mutex<Option<Cached>>,
}

impl EngineProber {
    pub fn new(
        engines: Vec<Arc<dyn ConversionEngine>>,
        timeout: Duration,
        cache_window: Duration,
    ) -> Self {
        Self {
            engines,
            timeout,
            cache_window,
            cache: Mutex::new(None),
        }
    }

    /// Availability of all engines, from cache when fresh.
    pub async fn availability(&self) -> Availability {
        let fresh = self
            .cache
            .lock()
            .as_ref()
            .filter(|cached| cached.at.elapsed() < self.cache_window)
            .map(|cached| cached.snapshot.clone());

        match fresh {
            Some(snapshot) => snapshot,
            None => self.refresh().await,
        }
    }

    /// Probe every engine now and replace the cached snapshot.
    pub async fn refresh(&self) -> Availability {
        let probes = self.engines.iter().map(|engine| self.probe_one(engine.as_ref()));
        let snapshot = Availability(futures::future::join_all(probes).await);

        *self.cache.lock() = Some(Cached {
            at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Forget the cached snapshot so the next call re-probes.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    async fn probe_one(&self, engine: &dyn ConversionEngine) -> EngineAvailability {
        let available = match engine.probe_command() {
            None => false,
            Some(mut cmd) => {
                cmd.timeout(self.timeout).kill_grace(Duration::from_secs(1));
                match cmd.execute().await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(engine = engine.name(), error = %e, "Engine probe failed");
                        false
                    }
                }
            }
        };

        EngineAvailability {
            engine: engine.kind(),
            available,
            probed_at: Utc::now(),
        }
    }
}

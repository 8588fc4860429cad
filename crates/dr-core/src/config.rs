//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, artifact storage, engines, workers, reaper and
//! delivery. Every section defaults sensibly so a completely empty `{}` file is
//! valid. Environment variables are layered on top with
//! [`Config::apply_env_overrides`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::job::EndpointVariant;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engines: EnginesConfig,
    pub workers: WorkersConfig,
    pub reaper: ReaperConfig,
    pub delivery: DeliveryConfig,
    pub status: StatusConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Layer environment overrides on top of the loaded values.
    ///
    /// `lookup` is normally `|k| std::env::var(k).ok()`. Unparseable numeric
    /// values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("DOC_LOCAL_DIR").filter(|v| !v.trim().is_empty()) {
            self.storage.local_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("CONVERT_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.engines.convert_timeout_secs = secs,
                _ => tracing::warn!("Ignoring invalid CONVERT_TIMEOUT value '{raw}'"),
            }
        }

        if let Some(path) = lookup("SOFFICE_PATH").filter(|v| !v.trim().is_empty()) {
            self.engines.libreoffice_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("NATIVE_OFFICE_PATH").filter(|v| !v.trim().is_empty()) {
            self.engines.native_office_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("WORKER_COUNT") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.workers.count = n,
                _ => tracing::warn!("Ignoring invalid WORKER_COUNT value '{raw}'"),
            }
        }

        if let Some(suffix) = lookup("TARGET_ENDPOINT_SUFFIX").filter(|v| !v.trim().is_empty()) {
            self.delivery.callback.path = suffix;
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.workers.count == 0 {
            warnings.push("workers.count is 0; jobs will never be processed".into());
        }

        if self.engines.convert_timeout_secs == 0 {
            warnings.push("engines.convert_timeout_secs is 0; every conversion will time out".into());
        }

        if self.reaper.enabled && self.reaper.grace_secs <= self.engines.convert_timeout_secs {
            warnings.push(format!(
                "reaper.grace_secs ({}) does not exceed engines.convert_timeout_secs ({}); \
                 active conversions may be reaped",
                self.reaper.grace_secs, self.engines.convert_timeout_secs
            ));
        }

        if self.reaper.enabled && self.reaper.interval_secs == 0 {
            warnings.push("reaper.interval_secs is 0; periodic sweeps will run every second".into());
        }

        for variant in [EndpointVariant::Callback, EndpointVariant::Upload] {
            let policy = self.delivery.policy(variant);
            if policy.max_attempts == 0 {
                warnings.push(format!("delivery.{variant}.max_attempts is 0; nothing will be delivered"));
            }
            if policy.multiplier < 2 {
                warnings.push(format!(
                    "delivery.{variant}.multiplier is {}; backoff will not grow",
                    policy.multiplier
                ));
            }
        }

        if self.delivery.field_name.is_empty() {
            warnings.push("delivery.field_name is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Local artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub local_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./document"),
        }
    }
}

/// Conversion engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// Hard wall-clock budget per engine invocation.
    pub convert_timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL when a timed-out engine is stopped.
    pub kill_grace_secs: u64,
    /// Budget for a single availability probe.
    pub probe_timeout_secs: u64,
    /// How long probe results are reused.
    pub probe_cache_secs: u64,
    /// Outputs smaller than this are treated as silent engine failures.
    pub min_output_bytes: u64,
    /// Explicit path to `soffice`.
    pub libreoffice_path: Option<PathBuf>,
    /// Explicit path to the native office converter.
    pub native_office_path: Option<PathBuf>,
}

impl EnginesConfig {
    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_cache(&self) -> Duration {
        Duration::from_secs(self.probe_cache_secs)
    }
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            convert_timeout_secs: 90,
            kill_grace_secs: 5,
            probe_timeout_secs: 5,
            probe_cache_secs: 30,
            min_output_bytes: 100,
            libreoffice_path: None,
            native_office_path: None,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { count: 2 }
    }
}

/// Stale engine process reaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    /// Engine processes younger than this are never killed.
    pub grace_secs: u64,
    /// Interval of the periodic background sweep.
    pub interval_secs: u64,
}

impl ReaperConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_secs: 300,
            interval_secs: 60,
        }
    }
}

/// Result delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Multipart field carrying the PDF.
    pub field_name: String,
    /// JSON key whose presence in the response body confirms the upload.
    pub success_marker: String,
    pub user_agent: String,
    pub callback: DeliveryPolicyConfig,
    pub upload: DeliveryPolicyConfig,
}

impl DeliveryConfig {
    pub fn policy(&self, variant: EndpointVariant) -> &DeliveryPolicyConfig {
        match variant {
            EndpointVariant::Callback => &self.callback,
            EndpointVariant::Upload => &self.upload,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            field_name: "docupload".into(),
            success_marker: "upload_data".into(),
            user_agent: concat!("docrelay/", env!("CARGO_PKG_VERSION")).into(),
            callback: DeliveryPolicyConfig::callback(),
            upload: DeliveryPolicyConfig::upload(),
        }
    }
}

/// Per-variant endpoint path and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPolicyConfig {
    pub path: String,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl DeliveryPolicyConfig {
    fn callback() -> Self {
        Self {
            path: "check/responseBalikConvert".into(),
            max_attempts: 3,
            initial_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 30_000,
            timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }

    fn upload() -> Self {
        Self {
            path: "check/responseBalikUpload".into(),
            max_attempts: 5,
            initial_delay_ms: 2_000,
            multiplier: 2,
            max_delay_ms: 60_000,
            timeout_secs: 120,
            connect_timeout_secs: 15,
        }
    }
}

/// Inspection surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Number of jobs listed under `recent_jobs`.
    pub recent_window: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { recent_window: 20 }
    }
}

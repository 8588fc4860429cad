//! The job record model: status machine, target keys, callback selectors.
//!
//! A [`JobRecord`] is created once at admission and afterwards mutated only
//! through [`JobRecord::apply`], which enforces the monotonic
//! `Queued -> Processing -> {Completed, Failed}` lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::JobId;

/// Longest accepted target key, in bytes after sanitisation.
pub const MAX_TARGET_KEY_LEN: usize = 128;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is the one legal successor of `self`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EndpointVariant
// ---------------------------------------------------------------------------

/// Selects the callback path suffix and the delivery retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointVariant {
    /// The conversion response endpoint. Short timeouts, few retries.
    #[default]
    Callback,
    /// The bulk upload endpoint. Longer timeouts, more retries.
    Upload,
}

impl EndpointVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointVariant::Callback => "callback",
            EndpointVariant::Upload => "upload",
        }
    }
}

impl fmt::Display for EndpointVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "a" | "callback" => Ok(EndpointVariant::Callback),
            "b" | "upload" => Ok(EndpointVariant::Upload),
            other => Err(Error::Validation(format!(
                "unknown endpoint variant '{other}' (expected callback or upload)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TargetKey
// ---------------------------------------------------------------------------

/// Caller-supplied identifier, sanitised into a safe file-name token.
///
/// Artifact paths are derived from it, so two jobs with the same key contend
/// for the same files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    /// Validate and sanitise a raw key.
    ///
    /// Path separators and `..` segments are rejected outright. Any other
    /// character outside `[A-Za-z0-9._-]` becomes `_`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();

        if trimmed.contains('/') || trimmed.contains('\\') {
            return Err(Error::Validation(format!(
                "target key '{trimmed}' must not contain path separators"
            )));
        }
        if trimmed.contains("..") {
            return Err(Error::Validation(format!(
                "target key '{trimmed}' must not contain '..'"
            )));
        }

        let sanitized: String = trimmed
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
            return Err(Error::Validation(
                "target key is empty or invalid after sanitisation".into(),
            ));
        }
        if sanitized.len() > MAX_TARGET_KEY_LEN {
            return Err(Error::Validation(format!(
                "target key exceeds {MAX_TARGET_KEY_LEN} characters"
            )));
        }

        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// DocumentKind
// ---------------------------------------------------------------------------

/// Accepted input document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Docx,
    Doc,
}

impl DocumentKind {
    /// Detect the kind from a declared file name (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.ends_with(".docx") {
            Some(DocumentKind::Docx)
        } else if lower.ends_with(".doc") {
            Some(DocumentKind::Doc)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Docx => "docx",
            DocumentKind::Doc => "doc",
        }
    }
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// Where and how the converted artifact is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub variant: EndpointVariant,
}

impl Callback {
    pub fn new(base_url: &str, variant: EndpointVariant) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            variant,
        }
    }

    /// Join the base URL with an endpoint path suffix.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// JobResult / JobRecord
// ---------------------------------------------------------------------------

/// Outcome recorded on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub engine_used: String,
    pub output_bytes: u64,
    pub callback_url: String,
    pub callback_status: u16,
    /// Parsed JSON body, or the raw text as a JSON string.
    pub callback_response: serde_json::Value,
    pub delivery_attempts: u32,
    pub files_cleaned: bool,
}

/// A state change requested by the owning worker.
#[derive(Debug, Clone)]
pub enum Transition {
    Start { worker_id: usize },
    Complete(JobResult),
    Fail(String),
}

impl Transition {
    pub fn target_status(&self) -> JobStatus {
        match self {
            Transition::Start { .. } => JobStatus::Processing,
            Transition::Complete(_) => JobStatus::Completed,
            Transition::Fail(_) => JobStatus::Failed,
        }
    }
}

/// The tracked state of one admitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Admission sequence number, used for ordering snapshots.
    pub seq: u64,
    pub target_key: TargetKey,
    pub file_name: String,
    pub document_kind: DocumentKind,
    pub payload_bytes: u64,
    pub callback: Callback,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub owner_worker_id: Option<usize>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        seq: u64,
        target_key: TargetKey,
        file_name: String,
        document_kind: DocumentKind,
        payload_bytes: u64,
        callback: Callback,
    ) -> Self {
        Self {
            id,
            seq,
            target_key,
            file_name,
            document_kind,
            payload_bytes,
            callback,
            status: JobStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            owner_worker_id: None,
            error: None,
            result: None,
        }
    }

    /// Apply a transition, rejecting anything out of order.
    ///
    /// A rejection means two workers touched the same job or a worker skipped
    /// a step, so it surfaces as [`Error::Internal`].
    pub fn apply(&mut self, transition: Transition) -> Result<()> {
        let next = transition.target_status();
        if !self.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "invalid transition for job {}: {} -> {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        match transition {
            Transition::Start { worker_id } => {
                self.owner_worker_id = Some(worker_id);
                self.started_at = Some(now);
            }
            Transition::Complete(result) => {
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            Transition::Fail(error) => {
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.status = next;
        Ok(())
    }
}

/// Compact view of a job for the inspection surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub target_key: TargetKey,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            target_key: record.target_key.clone(),
            status: record.status,
            queued_at: record.queued_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
        }
    }
}

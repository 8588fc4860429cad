//! Admission: validate an incoming request, record it and enqueue it.
//!
//! Everything rejected here is rejected synchronously with a validation
//! error; nothing invalid ever reaches the queue.

use bytes::Bytes;
use serde::Serialize;

use dr_core::events::EventPayload;
use dr_core::{
    Callback, DocumentKind, EndpointVariant, Error, JobId, JobRecord, Result, TargetKey,
};

use crate::context::AppContext;
use crate::queue::QueuedJob;

/// A conversion request as received from the transport layer.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub payload: Bytes,
    pub file_name: String,
    pub target_key: String,
    pub callback_url: String,
    /// Endpoint variant selector; empty selects the default.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Admitted {
    pub job_id: JobId,
    pub accepted_queue_depth: usize,
}

/// Validate, record and enqueue a job.
pub fn admit(ctx: &AppContext, request: AdmissionRequest) -> Result<Admitted> {
    let target_key = TargetKey::parse(&request.target_key)?;

    let document_kind = DocumentKind::from_file_name(&request.file_name).ok_or_else(|| {
        Error::Validation(format!(
            "unsupported file '{}': only .docx and .doc are accepted",
            request.file_name
        ))
    })?;

    if request.payload.is_empty() {
        return Err(Error::Validation("uploaded file is empty".into()));
    }
    let max = ctx.config.server.max_upload_bytes;
    if request.payload.len() > max {
        tracing::debug!(size = request.payload.len(), limit = max, "Rejecting oversized upload");
        return Err(Error::PayloadTooLarge { limit: max });
    }

    let variant: EndpointVariant = request.endpoint.parse()?;
    let callback = Callback::new(&validate_callback_url(&request.callback_url)?, variant);

    let id = JobId::new();
    let record = JobRecord::new(
        id,
        ctx.status.next_seq(),
        target_key.clone(),
        request.file_name,
        document_kind,
        request.payload.len() as u64,
        callback.clone(),
    );
    ctx.status.create(record)?;

    let depth = ctx.queue.enqueue(QueuedJob {
        id,
        target_key: target_key.clone(),
        document_kind,
        callback,
        payload: request.payload,
    });

    tracing::info!(job_id = %id, target_key = %target_key, queue_depth = depth, "Job queued");
    ctx.event_bus.broadcast(EventPayload::JobQueued {
        job_id: id,
        target_key: target_key.to_string(),
        queue_depth: depth,
    });

    Ok(Admitted {
        job_id: id,
        accepted_queue_depth: depth,
    })
}

/// Require an absolute http(s) URL with a host.
fn validate_callback_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("callback URL is required".into()));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| Error::Validation(format!("invalid callback URL '{trimmed}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "callback URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Validation("callback URL has no host".into()));
    }

    Ok(trimmed.to_string())
}

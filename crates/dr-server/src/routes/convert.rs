//! Job admission over multipart HTTP.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Serialize;

use dr_core::{Error, JobId};

use crate::admission::{admit, AdmissionRequest};
use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub accepted_queue_depth: usize,
    pub status: &'static str,
}

/// POST /convert
///
/// Fields: `file` (the document), `target_key` (alias `nomor_urut`),
/// `target_url` (alias `callback_url`), optional `endpoint`.
pub async fn submit(
    State(ctx): State<AppContext>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let attach_id = |e: Error| AppError::new(e).with_request_id(request_id.clone());

    let limit = ctx.config.server.max_upload_bytes;
    let request = read_form(multipart, limit).await.map_err(&attach_id)?;
    let admitted = admit(&ctx, request).map_err(&attach_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: admitted.job_id,
            accepted_queue_depth: admitted.accepted_queue_depth,
            status: "queued",
        }),
    ))
}

async fn read_form(mut multipart: Multipart, limit: usize) -> dr_core::Result<AdmissionRequest> {
    let mut file: Option<(String, Bytes)> = None;
    let mut target_key = String::new();
    let mut callback_url = String::new();
    let mut endpoint = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, limit, "malformed multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| form_error(e, limit, "failed to read file"))?;
                file = Some((file_name, data));
            }
            "target_key" | "nomor_urut" => target_key = text(field, limit).await?,
            "target_url" | "callback_url" => callback_url = text(field, limit).await?,
            "endpoint" => endpoint = text(field, limit).await?,
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    let (file_name, payload) =
        file.ok_or_else(|| Error::Validation("missing 'file' field".into()))?;

    Ok(AdmissionRequest {
        payload,
        file_name,
        target_key,
        callback_url,
        endpoint,
    })
}

async fn text(field: Field<'_>, limit: usize) -> dr_core::Result<String> {
    field
        .text()
        .await
        .map_err(|e| form_error(e, limit, "unreadable form field"))
}

/// A body cut off by the request size limit is 413, anything else is a
/// malformed request.
fn form_error(e: MultipartError, limit: usize, context: &str) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::Validation(format!("{context}: {e}"))
    }
}

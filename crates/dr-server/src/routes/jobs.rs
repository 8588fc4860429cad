//! Job lookup handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use dr_core::{Error, JobId, JobRecord, JobStatus};

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<JobStatus>,
}

/// GET /jobs
///
/// Every job in admission order, optionally filtered by status.
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsParams>,
) -> Json<Vec<JobRecord>> {
    let jobs = ctx
        .status
        .snapshot()
        .into_iter()
        .filter(|job| params.status.map_or(true, |s| job.status == s))
        .collect();
    Json(jobs)
}

/// GET /jobs/{id}
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| Error::Validation(format!("invalid job id '{id}'")))?;

    ctx.status
        .get(job_id)
        .map(Json)
        .ok_or_else(|| Error::not_found("job", job_id).into())
}

//! Route handlers. Each one translates store and storage outcomes into
//! status codes; nothing below this layer knows about HTTP.

use axum::extract::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::models::{
    ExportParams, Pending, QueryAccepted, QueryAnswer, QueryRequest, StateResponse, SummaryReady,
    UploadResponse, ALLOWED_CONTENT_TYPES,
};
use super::state::AppState;
use crate::health;
use crate::parser::parse_spec;
use crate::query::{validate_query, QueryStatus};
use crate::state::{JobState, TaskState};
use crate::storage::{ExportFormat, JobStorage, SpecFormat};

/// What is known about a job id.
enum JobView {
    /// A state record exists.
    Tracked(JobState, JobStorage),
    /// The spec is on disk but the state record expired or was lost.
    Untracked(JobStorage),
}

fn lookup_job(state: &AppState, job_id: &str) -> Result<JobView, ApiError> {
    let storage = JobStorage::open(&state.storage_root, job_id)?;
    match state.store.get(job_id)? {
        Some(job) => Ok(JobView::Tracked(job, storage)),
        None if storage.job_exists() => Ok(JobView::Untracked(storage)),
        None => Err(ApiError::job_not_found()),
    }
}

/// Requires a finished job; queries only run against completed summaries.
fn completed_job(state: &AppState, job_id: &str) -> Result<JobStorage, ApiError> {
    match lookup_job(state, job_id)? {
        JobView::Tracked(job, storage) => match job.state {
            TaskState::Success => Ok(storage),
            TaskState::Failure => Err(ApiError::bad_request("Job has failed")),
            _ => Err(ApiError::bad_request("Job is not complete")),
        },
        JobView::Untracked(storage) if storage.load_summary().is_some() => Ok(storage),
        JobView::Untracked(_) => Err(ApiError::bad_request("Job is not complete")),
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    let report = health::check(&state.store, state.pipeline.queue().as_ref());
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

pub async fn upload_spec(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
        upload = Some((content_type, bytes));
        break;
    }
    let (content_type, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !ALLOWED_CONTENT_TYPES.contains(&mime.as_str()) {
        return Err(ApiError::bad_request(format!(
            "Invalid file type '{content_type}'. Allowed types: {}",
            ALLOWED_CONTENT_TYPES.join(", ")
        )));
    }

    let text = String::from_utf8(bytes.to_vec())
        .map_err(|_| ApiError::bad_request("File must be UTF-8 encoded"))?;
    let (text, parsed) = tokio::task::spawn_blocking(move || {
        let parsed = parse_spec(&text);
        (text, parsed)
    })
    .await
    .map_err(|e| ApiError::internal(format!("spec parse task failed: {e}")))?;
    let parsed =
        parsed.map_err(|e| ApiError::bad_request(format!("Invalid OpenAPI specification: {e}")))?;

    let job_id = Uuid::new_v4().to_string();
    let storage = JobStorage::create(&state.storage_root, &job_id)?;
    let spec_path = storage.save_spec(&text, SpecFormat::detect(&mime, &text))?;
    state.store.set_started(&job_id)?;
    if let Err(e) = storage.append_log("job created") {
        warn!(job_id = %job_id, error = %e, "Failed to write execution log");
    }

    if let Err(e) = state.pipeline.start(&job_id, &spec_path) {
        let message = format!("Failed to enqueue job: {e}");
        if let Err(store_err) = state.store.set_failure(&job_id, &message) {
            warn!(job_id = %job_id, error = %store_err, "Failed to record enqueue failure");
        }
        return Err(ApiError::unavailable("Task queue unavailable"));
    }

    info!(
        job_id = %job_id,
        title = %parsed.title,
        endpoints = parsed.endpoints.len(),
        "Specification accepted"
    );
    Ok(Json(UploadResponse { job_id }))
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    match lookup_job(&state, &job_id)? {
        JobView::Tracked(job, _) => match job.state {
            TaskState::Success => {
                let result = job
                    .result
                    .ok_or_else(|| ApiError::internal(format!("job {job_id} succeeded without a result")))?;
                Ok(Json(SummaryReady {
                    status: job.state,
                    result,
                })
                .into_response())
            }
            TaskState::Failure => Err(ApiError::JobFailed(
                job.error.unwrap_or_else(|| "Job failed".to_string()),
            )),
            other => {
                let mut pending = Pending::new(other.as_str());
                pending.progress = job.progress.last().cloned();
                Ok((StatusCode::ACCEPTED, Json(pending)).into_response())
            }
        },
        JobView::Untracked(storage) => match storage.load_summary() {
            Some(result) => Ok(Json(SummaryReady {
                status: TaskState::Success,
                result,
            })
            .into_response()),
            None => Ok((StatusCode::ACCEPTED, Json(Pending::new("PENDING"))).into_response()),
        },
    }
}

pub async fn get_state(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    match lookup_job(&state, &job_id)? {
        JobView::Tracked(job, _) => Ok(Json(StateResponse::from(job))),
        JobView::Untracked(_) => Err(ApiError::not_found("Job state not found")),
    }
}

pub async fn export_summary(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let format = match params.file_format.as_deref() {
        None => ExportFormat::Markdown,
        Some(raw) => raw.parse::<ExportFormat>().map_err(ApiError::unprocessable)?,
    };

    let storage = match lookup_job(&state, &job_id)? {
        JobView::Tracked(job, _) if job.state == TaskState::Failure => {
            return Err(ApiError::JobFailed(
                job.error.unwrap_or_else(|| "Job failed".to_string()),
            ));
        }
        JobView::Tracked(_, storage) | JobView::Untracked(storage) => storage,
    };

    if storage.load_summary().is_none() {
        let mut pending = Pending::new("PENDING");
        pending.detail = Some("Summary not ready".to_string());
        return Ok((StatusCode::ACCEPTED, Json(pending)).into_response());
    }

    let path = storage.ensure_export_exists(format)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(format!("read {}: {e}", path.display())))?;
    let disposition = format!(
        "attachment; filename=\"{job_id}_{}\"",
        format.file_name()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn submit_query(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QueryAccepted>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::unprocessable(e.body_text()))?;
    validate_query(&request.query).map_err(ApiError::unprocessable)?;

    let storage = completed_job(&state, &job_id)?;
    let record = state.queries.submit(storage, &request.query)?;
    info!(job_id = %job_id, query_id = %record.query_id, "Query accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(QueryAccepted {
            job_id,
            status: "PENDING".to_string(),
        }),
    ))
}

pub async fn get_query_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let storage = completed_job(&state, &job_id)?;
    let record = storage
        .get_query()
        .ok_or_else(|| ApiError::not_found("No query submitted for this job"))?;

    match record.status {
        QueryStatus::Pending => {
            Ok((StatusCode::ACCEPTED, Json(Pending::new("PENDING"))).into_response())
        }
        QueryStatus::Success => Ok(Json(QueryAnswer {
            query: record.query,
            answer: record.answer.unwrap_or_default(),
        })
        .into_response()),
        QueryStatus::Failure => Err(ApiError::JobFailed(
            record.error.unwrap_or_else(|| "Query failed".to_string()),
        )),
    }
}

use crate::server::AppContext;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reelgen_core::{Error, JobId, JobStats, JobStatus, SubmitRequest, UserId, VideoSettings};
use reelgen_db::models::Job;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/jobs/:id/restart", post(restart_job))
        .route("/jobs/:id/thumbnail", get(get_thumbnail))
        .route("/stats", get(get_stats))
}

/// Error envelope returned by every handler.
///
/// Status codes come from [`Error::http_status`]; the body is
/// `{"error": "..."}`.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Job DTO mirroring the submission shape, with lifecycle fields added.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: JobId,
    pub user_id: UserId,
    pub prompt: String,
    pub settings: VideoSettings,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Remaining time estimate, present only while processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobResponse {
    fn from_job(job: Job, eta_secs: Option<u64>) -> Self {
        let settings = job.settings();
        Self {
            id: job.id,
            user_id: job.user_id,
            prompt: job.prompt,
            settings,
            status: job.status,
            progress: job.progress,
            stage: job.stage,
            error: job.error,
            output_url: job.output_url,
            thumbnail_url: job.thumbnail_url,
            eta_secs,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

fn eta_for(ctx: &AppContext, job: &Job) -> Option<u64> {
    if job.status == JobStatus::Processing {
        ctx.queue.progress().eta_secs(job.id)
    } else {
        None
    }
}

async fn submit_job(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = ctx.queue.submit(&req)?;
    Ok((StatusCode::CREATED, Json(JobResponse::from_job(job, None))))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let status = match params.status.as_deref() {
        None => None,
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| Error::validation(format!("unknown status filter: {s}")))?,
        ),
    };
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let jobs = ctx.queue.list_jobs(status, limit)?;
    let out = jobs
        .into_iter()
        .map(|job| {
            let eta = eta_for(&ctx, &job);
            JobResponse::from_job(job, eta)
        })
        .collect();
    Ok(Json(out))
}

async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = JobId::from(id);
    let job = ctx
        .queue
        .get_job(id)?
        .ok_or_else(|| Error::not_found("Job", id))?;
    let eta = eta_for(&ctx, &job);
    Ok(Json(JobResponse::from_job(job, eta)))
}

async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId::from(id);
    if ctx.queue.get_job(id)?.is_none() {
        return Err(Error::not_found("Job", id).into());
    }
    let cancelled = ctx.queue.cancel(id)?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn restart_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId::from(id);
    if ctx.queue.get_job(id)?.is_none() {
        return Err(Error::not_found("Job", id).into());
    }
    let restarted = ctx.queue.restart(id)?;
    Ok(Json(serde_json::json!({ "restarted": restarted })))
}

async fn get_thumbnail(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let id = JobId::from(id);
    let job = ctx
        .queue
        .get_job(id)?
        .ok_or_else(|| Error::not_found("Job", id))?;
    if job.thumbnail_url.is_none() {
        return Err(Error::not_found("Thumbnail", id).into());
    }

    let bytes = ctx.queue.assets().load_thumbnail(id).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    counts: JobStats,
    active: usize,
    total: u64,
}

async fn get_stats(State(ctx): State<AppContext>) -> Result<Json<StatsResponse>, ApiError> {
    let counts = ctx.queue.stats()?;
    Ok(Json(StatsResponse {
        total: counts.total(),
        active: ctx.queue.active_count(),
        counts,
    }))
}

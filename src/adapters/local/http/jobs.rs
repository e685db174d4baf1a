use super::error::{ApiError, ApiResult};
use super::HttpState;
use crate::domain::jobs::{Job, JobId};
use crate::ports::storage::ArtifactStore;
use crate::ports::worker::WorkerRunner;
use axum::{
    extract::{Path, State},
    Json,
};

/// `GET /jobs/:id`
pub async fn get_job<S, W>(
    State(state): State<HttpState<S, W>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>>
where
    S: ArtifactStore + 'static,
    W: WorkerRunner + 'static,
{
    JobId::parse(&id)
        .and_then(|job_id| state.pipeline.job(job_id))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))
}

use super::error::{ApiError, ApiResult};
use super::HttpState;
use crate::application::{JobOutcome, Upload};
use crate::domain::api::{IngestionResponse, Origin};
use crate::domain::errors::IngestionError;
use crate::ports::storage::ArtifactStore;
use crate::ports::worker::WorkerRunner;
use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use tracing::debug;

/// `POST /process-video`
///
/// The first multipart field carrying a file name is the video. It is
/// streamed straight into the pipeline; nothing is buffered in memory.
pub async fn process_video<S, W>(
    State(state): State<HttpState<S, W>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestionResponse>>
where
    S: ArtifactStore + 'static,
    W: WorkerRunner + 'static,
{
    let origin = request_origin(&headers, &state.fallback_host);

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(IngestionError::Interrupted(e.to_string()).into()),
        };
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            debug!(name = ?field.name(), "Skipping non-file field");
            continue;
        };

        let outcome = state
            .pipeline
            .submit(Some(Upload::new(file_name, field)), &origin)
            .await?;
        return Ok(respond(outcome));
    }

    state
        .pipeline
        .submit(None, &origin)
        .await
        .map(respond)
        .map_err(ApiError::from)
}

fn respond(outcome: JobOutcome) -> Json<IngestionResponse> {
    Json(IngestionResponse {
        message: "Video processed successfully".to_string(),
        job_id: outcome.job_id,
        result: outcome.result,
        worker_output: outcome.worker_output,
    })
}

/// Scheme and host as seen by the client, honoring a reverse proxy.
pub fn request_origin(headers: &HeaderMap, fallback_host: &str) -> Origin {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    let scheme = match header("x-forwarded-proto").as_deref() {
        Some("https") => "https",
        _ => "http",
    };
    let host = header("x-forwarded-host")
        .or_else(|| header("host"))
        .unwrap_or_else(|| fallback_host.to_string());
    Origin::new(scheme, host)
}

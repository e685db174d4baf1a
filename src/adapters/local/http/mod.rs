//! HTTP inbound adapter.
//!
//! Accepts multipart video uploads, runs them through the [`JobPipeline`]
//! and serves processed videos back out of the artifact store.

pub mod error;
pub mod ingest;
pub mod jobs;

use crate::adapters::local::fs::PUBLIC_PREFIX;
use crate::application::JobPipeline;
use crate::config::ServerConfig;
use crate::ports::storage::ArtifactStore;
use crate::ports::worker::WorkerRunner;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub struct HttpState<S, W> {
    pub pipeline: Arc<JobPipeline<S, W>>,
    /// Host used in artifact URLs when the request names none.
    pub fallback_host: String,
}

impl<S, W> Clone for HttpState<S, W> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            fallback_host: self.fallback_host.clone(),
        }
    }
}

/// Build the server's router.
///
/// `results_root` is served read-only under `/processed-videos`.
pub fn create_router<S, W>(
    pipeline: Arc<JobPipeline<S, W>>,
    results_root: impl AsRef<Path>,
    config: &ServerConfig,
) -> Router
where
    S: ArtifactStore + 'static,
    W: WorkerRunner + 'static,
{
    let body_limit = usize::try_from(config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    let state = HttpState {
        pipeline,
        fallback_host: config.bind_addr(),
    };
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/test", get(test))
        .route("/process-video", post(ingest::process_video::<S, W>))
        .route("/jobs/:id", get(jobs::get_job::<S, W>))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(results_root.as_ref()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn root() -> &'static str {
    "Pose Estimation Backend is running"
}

async fn test() -> Json<Value> {
    Json(json!({ "message": "Server is working" }))
}

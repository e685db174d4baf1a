//! API Error Handling
//!
//! Maps pipeline failures onto status codes and the JSON error body.

use crate::domain::api::{ErrorBody, ErrorKind};
use crate::domain::errors::{IngestionError, PipelineError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(PipelineError::Ingestion(IngestionError::TooLarge { .. })) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ApiError::Pipeline(PipelineError::Ingestion(_)) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::Saturated) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn body(&self) -> ErrorBody {
        let (kind, exit_code, stderr) = match self {
            ApiError::Pipeline(PipelineError::Ingestion(_)) => (ErrorKind::Ingestion, None, None),
            ApiError::NotFound(_) => (ErrorKind::NotFound, None, None),
            ApiError::Pipeline(PipelineError::Worker(e)) => (
                ErrorKind::Worker,
                e.exit_code(),
                e.stderr().map(str::to_owned),
            ),
            ApiError::Pipeline(PipelineError::Correlation(_)) => {
                (ErrorKind::Correlation, None, None)
            }
            ApiError::Pipeline(PipelineError::Saturated) => (ErrorKind::Unavailable, None, None),
            ApiError::Pipeline(PipelineError::Storage(_) | PipelineError::State(_)) => {
                (ErrorKind::Internal, None, None)
            }
        };
        let error = match self {
            ApiError::Pipeline(PipelineError::Storage(_)) => {
                "Failed to store artifacts".to_string()
            }
            ApiError::Pipeline(e) => e.to_string(),
            ApiError::NotFound(msg) => msg.clone(),
        };
        ErrorBody {
            error,
            kind,
            exit_code,
            stderr,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", describe(&self));
        }
        (status, Json(self.body())).into_response()
    }
}

fn describe(err: &ApiError) -> String {
    match err {
        ApiError::Pipeline(e) => format!("{:?}", e),
        ApiError::NotFound(msg) => msg.clone(),
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        ApiError::Pipeline(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

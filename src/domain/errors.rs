//! Error taxonomy shared by the server pipeline and the device-side client.

use std::time::Duration;
use thiserror::Error;

use super::api::ErrorBody;
use super::jobs::{JobId, JobState};

/// Client-caused problems with the upload itself. Detected before any worker runs.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Uploaded file exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("Upload interrupted: {0}")]
    Interrupted(String),
}

/// Failures of the external analysis process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start worker `{command}`: {reason}")]
    SpawnFailure { command: String, reason: String },
    #[error("Worker exited with code {}", display_code(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("Worker timed out after {}s", .after.as_secs())]
    Timeout { after: Duration, stderr: String },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

impl WorkerError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            WorkerError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            WorkerError::NonZeroExit { stderr, .. } | WorkerError::Timeout { stderr, .. } => {
                Some(stderr.as_str())
            }
            WorkerError::SpawnFailure { .. } => None,
        }
    }
}

/// The worker exited 0 but its output cannot be turned into a result.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("Worker produced no result file")]
    MissingResult,
    #[error("Worker reported an error: {0}")]
    WorkerReported(String),
    #[error("Error parsing processing results: {0}")]
    Malformed(String),
    #[error("Invalid `{field}` in processing results: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Processed video `{0}` does not exist")]
    MissingArtifact(String),
    #[error("Processed video `{0}` is outside the job output directory")]
    OutsideJobScope(String),
    #[error("Error reading processing results: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// Everything `JobPipeline::submit` can fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("All workers are busy, retry later")]
    Saturated,
    #[error("Artifact storage failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Camera,
    Microphone,
    MediaLibrary,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Missing device permissions: {0:?}")]
    Denied(Vec<Permission>),
}

/// Device-side transport failures when talking to the ingestion endpoint.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Could not read recorded video: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Server rejected upload ({status}): {}", .body.error)]
    Rejected { status: u16, body: ErrorBody },
}

/// An event that the capture state machine cannot accept in its current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("`{event}` is not allowed while {state}")]
    InvalidEvent {
        state: &'static str,
        event: &'static str,
    },
    #[error(transparent)]
    Permission(#[from] PermissionError),
}

use crate::domain::api::Origin;
use crate::domain::errors::CorrelationError;
use crate::domain::jobs::{CorrelatedOutput, JobId};
use crate::ports::storage::ArtifactStore;
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File the worker writes its metrics to, inside the job output directory.
pub const RESULT_FILE: &str = "result.json";

/// Turns what a successful worker run left behind into a [`CorrelatedOutput`].
///
/// Only ever reads the output directory of the job it is asked about, so a
/// concurrent job finishing first cannot leak its metrics into this one.
pub struct ResultCorrelator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> ResultCorrelator<'a, S>
where
    S: ArtifactStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn correlate(
        &self,
        job_id: JobId,
        output_dir: &Path,
        origin: &Origin,
    ) -> Result<CorrelatedOutput, CorrelationError> {
        let raw = match tokio::fs::read(output_dir.join(RESULT_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%job_id, "Worker exited cleanly but wrote no {}", RESULT_FILE);
                return Err(CorrelationError::MissingResult);
            }
            Err(e) => return Err(e.into()),
        };

        let report = WorkerReport::parse(&raw)?;
        debug!(%job_id, frames = report.frames_processed, "Parsed worker report");

        let video = self.locate(output_dir, &report.processed_video).await?;
        let public_path = self
            .store
            .publish(job_id, &video)
            .ok_or_else(|| CorrelationError::OutsideJobScope(display_name(&video)))?;

        Ok(CorrelatedOutput {
            frames_processed: report.frames_processed,
            average_confidence: report.average_confidence,
            processed_video_path: self.store.relative(&video),
            processed_video_url: origin.url(&public_path),
        })
    }

    async fn locate(
        &self,
        output_dir: &Path,
        reported: &str,
    ) -> Result<PathBuf, CorrelationError> {
        let reported_path = Path::new(reported);
        let candidate = if reported_path.is_absolute() {
            reported_path.to_path_buf()
        } else {
            output_dir.join(reported_path)
        };
        let name = display_name(&candidate);

        let scope = tokio::fs::canonicalize(output_dir).await?;
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CorrelationError::MissingArtifact(name))
            }
            Err(e) => return Err(e.into()),
        };
        if !resolved.starts_with(&scope) {
            return Err(CorrelationError::OutsideJobScope(name));
        }
        let metadata = tokio::fs::metadata(&resolved).await?;
        if !metadata.is_file() {
            return Err(CorrelationError::MissingArtifact(name));
        }
        Ok(resolved)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("<unnamed>"))
}

/// Validated content of the worker's result file.
#[derive(Debug, PartialEq)]
struct WorkerReport {
    frames_processed: u64,
    average_confidence: f64,
    processed_video: String,
}

impl WorkerReport {
    fn parse(raw: &[u8]) -> Result<Self, CorrelationError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| CorrelationError::Malformed(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(CorrelationError::Malformed(
                "expected a JSON object".to_string(),
            ));
        };

        if let Some(error) = fields.get("error") {
            let message = match error {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Err(CorrelationError::WorkerReported(message));
        }

        let frames_processed = match fields.get("framesProcessed") {
            Some(value) => value
                .as_u64()
                .ok_or_else(|| invalid("framesProcessed", "expected a non-negative integer"))?,
            None => return Err(invalid("framesProcessed", "missing")),
        };

        let average_confidence = match fields.get("averageConfidence") {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| invalid("averageConfidence", "expected a number"))?,
            None => return Err(invalid("averageConfidence", "missing")),
        };
        if !(0.0..=1.0).contains(&average_confidence) {
            return Err(invalid("averageConfidence", "must be between 0 and 1"));
        }

        let processed_video = video_path(&fields)?;

        Ok(Self {
            frames_processed,
            average_confidence,
            processed_video,
        })
    }
}

fn video_path(fields: &Map<String, Value>) -> Result<String, CorrelationError> {
    let value = fields
        .get("processedVideoPath")
        .or_else(|| fields.get("outputVideoPath"))
        .ok_or_else(|| invalid("processedVideoPath", "missing"))?;
    match value.as_str() {
        Some(path) if !path.trim().is_empty() => Ok(path.to_string()),
        _ => Err(invalid("processedVideoPath", "expected a non-empty string")),
    }
}

fn invalid(field: &'static str, reason: &str) -> CorrelationError {
    CorrelationError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

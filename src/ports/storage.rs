use crate::domain::errors::IngestionError;
use crate::domain::jobs::{ArtifactRecord, JobId};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use std::io;
use std::path::{Path, PathBuf};

/// Why an upload could not be stored.
#[derive(Debug)]
pub enum StoreError {
    Rejected(IngestionError),
    Io(io::Error),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Byte stream of an incoming upload. Errors are transport failures.
pub type UploadStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Job-scoped storage for uploaded and processed videos.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an upload under the job's own directory, aborting past `limit` bytes.
    async fn store(
        &self,
        job_id: JobId,
        file_name: &str,
        body: UploadStream<'_>,
        limit: u64,
    ) -> Result<ArtifactRecord, StoreError>;

    /// Directory the worker writes into for this job, created if needed.
    async fn resolve(&self, job_id: JobId) -> io::Result<PathBuf>;

    /// Public path segment under which a processed artifact is served.
    fn publish(&self, job_id: JobId, path: &Path) -> Option<String>;

    /// Artifact-root-relative form of a stored path.
    fn relative(&self, path: &Path) -> PathBuf;

    /// Delete the upload only.
    async fn purge_upload(&self, job_id: JobId) -> io::Result<()>;

    /// Delete everything stored for the job.
    async fn purge(&self, job_id: JobId) -> io::Result<()>;
}

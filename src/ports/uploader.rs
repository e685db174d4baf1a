use crate::domain::errors::UploadError;
use crate::domain::jobs::AnalysisResult;
use async_trait::async_trait;
use std::path::Path;

/// Device-side transfer of a recorded video to the ingestion endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, video: &Path) -> Result<AnalysisResult, UploadError>;
}

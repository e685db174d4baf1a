//! Device-side transport to the ingestion endpoint.

use crate::domain::api::{ErrorBody, ErrorKind, IngestionResponse};
use crate::domain::errors::UploadError;
use crate::domain::jobs::AnalysisResult;
use crate::ports::uploader::Uploader;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::Path;
use tracing::{debug, info};

const FIELD_NAME: &str = "video";
const DEFAULT_FILE_NAME: &str = "video.mp4";

/// Posts recorded videos to `<base_url>/process-video`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    base_url: String,
    client: Client,
}

impl HttpUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Use a preconfigured client, e.g. one with a request timeout.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rejection(response: reqwest::Response) -> UploadError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
            error: if text.is_empty() {
                status.to_string()
            } else {
                text
            },
            kind: ErrorKind::Internal,
            exit_code: None,
            stderr: None,
        });
        UploadError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, video: &Path) -> Result<AnalysisResult, UploadError> {
        let bytes = tokio::fs::read(video).await?;
        let file_name = video
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        debug!(bytes = bytes.len(), %file_name, "Uploading recorded video");

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = Form::new().part(FIELD_NAME, part);

        let response = self
            .client
            .post(format!("{}/process-video", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let body: IngestionResponse = response.json().await?;
        info!(job_id = %body.job_id, url = %body.result.processed_video_url, "Upload processed");
        Ok(body.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let uploader = HttpUploader::new("http://192.168.1.67:3000/");
        assert_eq!(uploader.base_url(), "http://192.168.1.67:3000");
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_any_request() {
        let uploader = HttpUploader::new("http://127.0.0.1:9");
        let err = uploader
            .upload(Path::new("/definitely/not/here.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}

use crate::domain::errors::IngestionError;
use crate::domain::jobs::{ArtifactKind, ArtifactRecord, JobId};
use crate::ports::storage::{ArtifactStore, StoreError, UploadStream};
use async_trait::async_trait;
use futures::TryStreamExt;
use regex::Regex;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;

pub const UPLOADS_DIR: &str = "uploads";
pub const RESULTS_DIR: &str = "results";
/// URL prefix mapped onto `<root>/results`.
pub const PUBLIC_PREFIX: &str = "/processed-videos";
const DEFAULT_UPLOAD_NAME: &str = "video.mp4";

/// Artifact store on the local filesystem.
///
/// Layout: `<root>/uploads/<job_id>/<name>` for inputs and
/// `<root>/results/<job_id>/` for worker output.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates the root if needed. The stored root is absolute, since workers
    /// run with a different working directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory served under [`PUBLIC_PREFIX`].
    pub fn results_root(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    fn upload_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(job_id.to_string())
    }

    fn output_dir(&self, job_id: JobId) -> PathBuf {
        self.results_root().join(job_id.to_string())
    }
}

/// Reduce a client-supplied file name to a safe basename.
pub fn sanitize_file_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = unsafe_chars.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

async fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(
        &self,
        job_id: JobId,
        file_name: &str,
        body: UploadStream<'_>,
        limit: u64,
    ) -> Result<ArtifactRecord, StoreError> {
        let dir = self.upload_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(sanitize_file_name(file_name));

        // Client-side stream failures are tagged so they are not mistaken for disk errors.
        let body = body.map_err(|err| io::Error::new(io::ErrorKind::ConnectionAborted, err));
        let body_reader = StreamReader::new(body);
        let mut limited = body_reader.take(limit.saturating_add(1));

        let mut file = BufWriter::new(File::create(&path).await?);
        let written = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(written) => written,
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                return Err(StoreError::Rejected(IngestionError::Interrupted(
                    e.to_string(),
                )))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        file.flush().await?;

        if written > limit {
            return Err(StoreError::Rejected(IngestionError::TooLarge { limit }));
        }
        if written == 0 {
            return Err(StoreError::Rejected(IngestionError::EmptyFile));
        }

        Ok(ArtifactRecord {
            job_id,
            kind: ArtifactKind::Upload,
            path,
            size_bytes: written,
        })
    }

    async fn resolve(&self, job_id: JobId) -> io::Result<PathBuf> {
        let dir = self.output_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn publish(&self, job_id: JobId, path: &Path) -> Option<String> {
        let inside = path.strip_prefix(self.output_dir(job_id)).ok()?;
        let mut segments = Vec::new();
        for component in inside.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_str()?.to_string()),
                _ => return None,
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}/{}",
            PUBLIC_PREFIX,
            job_id,
            segments.join("/")
        ))
    }

    fn relative(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(inside) => inside.to_path_buf(),
            Err(_) => path.file_name().map(PathBuf::from).unwrap_or_default(),
        }
    }

    async fn purge_upload(&self, job_id: JobId) -> io::Result<()> {
        remove_dir_if_exists(&self.upload_dir(job_id)).await
    }

    async fn purge(&self, job_id: JobId) -> io::Result<()> {
        remove_dir_if_exists(&self.upload_dir(job_id)).await?;
        remove_dir_if_exists(&self.output_dir(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use tempfile::tempdir;

    fn body(chunks: Vec<&'static str>) -> UploadStream<'static> {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, io::Error>(Bytes::from(c))),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_store_writes_under_job_directory() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();
        let job = JobId::new();

        let record = store
            .store(job, "squat.mp4", body(vec!["Hello, ", "world!"]), 1024)
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 13);
        assert_eq!(record.kind, ArtifactKind::Upload);
        assert!(record.path.starts_with(store.root().join("uploads").join(job.to_string())));
        let contents = tokio::fs::read_to_string(&record.path).await.unwrap();
        assert_eq!(contents, "Hello, world!");
    }

    #[tokio::test]
    async fn test_same_name_different_jobs_do_not_collide() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();

        let a = store
            .store(JobId::new(), "video.mp4", body(vec!["first"]), 1024)
            .await
            .unwrap();
        let b = store
            .store(JobId::new(), "video.mp4", body(vec!["second"]), 1024)
            .await
            .unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(tokio::fs::read_to_string(&a.path).await.unwrap(), "first");
        assert_eq!(tokio::fs::read_to_string(&b.path).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_store_rejects_oversized_upload() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();

        let result = store
            .store(JobId::new(), "big.mp4", body(vec!["0123456789", "abc"]), 10)
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Rejected(IngestionError::TooLarge { limit: 10 }))
        ));
    }

    #[tokio::test]
    async fn test_store_accepts_upload_at_exact_limit() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();

        let record = store
            .store(JobId::new(), "ok.mp4", body(vec!["0123456789"]), 10)
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 10);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_upload() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();

        let result = store.store(JobId::new(), "empty.mp4", body(vec![]), 10).await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected(IngestionError::EmptyFile))
        ));
    }

    #[tokio::test]
    async fn test_stream_error_is_an_interrupted_upload() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();
        let failing = stream::iter(vec![
            Ok(Bytes::from("partial")),
            Err(io::Error::new(io::ErrorKind::Other, "client went away")),
        ])
        .boxed();

        let result = store.store(JobId::new(), "v.mp4", failing, 1024).await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected(IngestionError::Interrupted(_)))
        ));
    }

    #[tokio::test]
    async fn test_publish_only_inside_job_output() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();
        let job = JobId::new();
        let other = JobId::new();
        let out = store.resolve(job).await.unwrap();

        assert_eq!(
            store.publish(job, &out.join("out.mp4")),
            Some(format!("/processed-videos/{}/out.mp4", job))
        );
        assert_eq!(store.publish(other, &out.join("out.mp4")), None);
        assert_eq!(store.publish(job, &out), None);
        assert_eq!(
            store.relative(&out.join("out.mp4")),
            PathBuf::from("results").join(job.to_string()).join("out.mp4")
        );
    }

    #[tokio::test]
    async fn test_purge_removes_everything_and_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();
        let job = JobId::new();
        let record = store
            .store(job, "v.mp4", body(vec!["data"]), 1024)
            .await
            .unwrap();
        let out = store.resolve(job).await.unwrap();
        tokio::fs::write(out.join("out.mp4"), b"processed").await.unwrap();

        store.purge_upload(job).await.unwrap();
        assert!(!record.path.exists());
        assert!(out.join("out.mp4").exists());

        store.purge(job).await.unwrap();
        assert!(!out.exists());
        store.purge(job).await.unwrap();
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("video.mp4"), "video.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\clips\\my squat.mov"), "my_squat.mov");
        assert_eq!(sanitize_file_name(".."), "video.mp4");
        assert_eq!(sanitize_file_name(""), "video.mp4");
    }

    #[tokio::test]
    async fn test_unbounded_limit_accepts_upload() {
        let temp_dir = tempdir().unwrap();
        let store = FsArtifactStore::new(temp_dir.path()).unwrap();

        let record = store
            .store(JobId::new(), "squat.mp4", body(vec!["frames"]), u64::MAX)
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 6);
    }
}
